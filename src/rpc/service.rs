//! RPC service
//!
//! Binds every component operation to its tool name and handles the MCP
//! request envelope. Transport-agnostic: stdio and HTTP both feed
//! `McpService::handle` and drain the session's push channel.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::protocol::{
    initialize_result, text_result, JsonRpcRequest, JsonRpcResponse, ToolDescriptor,
    INVALID_REQUEST, METHOD_NOT_FOUND,
};
use super::tools::{self, CHECK_INBOX};
use crate::contracts::ContractRegistry;
use crate::db::{self, Store};
use crate::error::Result;
use crate::handshake::HandshakeCoordinator;
use crate::mailbox::{Mailbox, Outgoing};
use crate::minions::MinionGovernor;
use crate::notify::Notifier;
use crate::roster::Roster;
use crate::session::{SessionHandle, SessionRegistry};
use crate::tasks::TaskBoard;

#[derive(Clone)]
pub struct McpService {
    store: Store,
    sessions: SessionRegistry,
    roster: Roster,
    mailbox: Mailbox,
    tasks: TaskBoard,
    handshakes: HandshakeCoordinator,
    contracts: ContractRegistry,
    minions: MinionGovernor,
}

impl McpService {
    pub fn new(store: Store, sessions: SessionRegistry, roster: Roster) -> Self {
        let notifier = Notifier::new(store.clone(), sessions.clone());
        Self {
            mailbox: Mailbox::new(store.clone(), sessions.clone(), notifier.clone()),
            tasks: TaskBoard::new(store.clone(), notifier.clone()),
            handshakes: HandshakeCoordinator::new(store.clone(), notifier.clone()),
            contracts: ContractRegistry::new(store.clone(), notifier),
            minions: MinionGovernor::new(store.clone()),
            roster,
            store,
            sessions,
        }
    }

    /// Handle one client message. Returns `None` for notifications.
    pub fn handle(&self, session: &SessionHandle, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let is_notification = request.is_notification();
        let reply = match request.method.as_str() {
            "initialize" => Some(initialize_result()),
            "ping" => Some(json!({})),
            "tools/list" => Some(json!({ "tools": self.tool_list(session) })),
            "tools/call" => {
                let text = self.call_tool(session, request.params);
                Some(text_result(text))
            }
            method if method.starts_with("notifications/") => None,
            method => {
                debug!(method, "unknown method");
                return id.map(|id| {
                    JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {method}"))
                });
            }
        };
        match (is_notification, reply) {
            (true, _) | (false, None) => None,
            (false, Some(result)) => {
                Some(JsonRpcResponse::success(id.unwrap_or(Value::Null), result))
            }
        }
    }

    /// Parse failures at the envelope level still deserve a JSON-RPC error.
    pub fn invalid_payload(message: impl Into<String>) -> JsonRpcResponse {
        JsonRpcResponse::error(Value::Null, INVALID_REQUEST, message)
    }

    /// Forget a session whose transport connection ended.
    pub fn release_session(&self, session: crate::session::SessionId) {
        self.sessions.unbind_session(session);
    }

    /// The tool catalogue, resolved per session: when the caller maps to an
    /// agent with unread mail, the `check_inbox` description gets the alert
    /// prefix so the urgency lands inside the client's next prompt.
    pub fn tool_list(&self, session: &SessionHandle) -> Vec<ToolDescriptor> {
        let mut tools = tools::catalog();

        let Some(agent) = self.sessions.agent_for(session.id) else {
            return tools;
        };
        let unread = self
            .store
            .with_conn(|conn| Ok(db::unread_info(conn, &agent)?));
        match unread {
            Ok((count, senders)) if count > 0 => {
                let alert = format!(
                    "*** YOU HAVE {count} UNREAD MESSAGE(S) from {} *** Call check_inbox now!",
                    senders.join(", ")
                );
                for tool in &mut tools {
                    if tool.name == CHECK_INBOX {
                        tool.description = format!("{alert} | {}", tool.description);
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(err) => warn!(agent = %agent, error = %err, "unread lookup failed for tool list"),
        }
        tools
    }

    /// Route one `tools/call` to its operation. All failures become the
    /// caller-facing string; the RPC envelope itself never errors for them.
    fn call_tool(&self, session: &SessionHandle, params: Value) -> String {
        #[derive(Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }

        let call: CallParams = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(err) => return format!("Error: invalid tools/call parameters: {err}"),
        };

        match self.dispatch(session, &call.name, call.arguments) {
            Ok(reply) => reply,
            Err(err) => {
                debug!(tool = call.name, error = %err, "tool call failed");
                err.caller_message()
            }
        }
    }

    fn dispatch(&self, session: &SessionHandle, tool: &str, args: Value) -> Result<String> {
        match tool {
            "register" => {
                let p: RegisterParams = parse(args)?;
                self.roster.register(
                    session,
                    &p.agent_name,
                    &p.role,
                    &p.description,
                    &p.team,
                    &p.token,
                )
            }
            "set_status" => {
                let p: AgentStatusParams = parse(args)?;
                self.roster.set_status(&p.agent_name, &p.status)
            }
            "send" => {
                let p: SendParams = parse(args)?;
                self.mailbox.send(
                    session,
                    &Outgoing {
                        from: &p.from_agent,
                        to: &p.to_agent,
                        body: &p.message,
                        cc: &p.cc,
                        task_id: &p.task_id,
                        reply_to: p.reply_to.filter(|&id| id != 0),
                    },
                )
            }
            "check_inbox" => {
                let p: AgentParams = parse(args)?;
                self.mailbox.check_inbox(session, &p.agent_name)
            }
            "get_history" => {
                let p: HistoryParams = parse(args)?;
                self.mailbox.get_history(p.count, &p.task_id)
            }
            "deregister" => {
                let p: AgentParams = parse(args)?;
                self.roster.deregister(&p.agent_name)
            }
            "who" => self.roster.who(),
            "ping" => {
                let p: AgentParams = parse(args)?;
                self.roster.ping(session, &p.agent_name)
            }
            "create_task" => {
                let p: CreateTaskParams = parse(args)?;
                self.tasks
                    .create_task(&p.creator, &p.title, &p.description, &p.assign_to, &p.project)
            }
            "update_task" => {
                let p: UpdateTaskParams = parse(args)?;
                self.tasks
                    .update_task(&p.agent_name, &p.task_id, &p.status, &p.result)
            }
            "list_tasks" => {
                let p: ListTasksParams = parse(args)?;
                self.tasks.list_tasks(&p.status, &p.assigned_to, &p.project)
            }
            "submit_for_review" => {
                let p: ReviewParams = parse(args)?;
                self.tasks.submit_for_review(
                    &p.agent_name,
                    &p.task_id,
                    &p.summary,
                    &p.files_changed,
                    &p.test_results,
                )
            }
            "approve_task" => {
                let p: ApproveParams = parse(args)?;
                self.tasks.approve_task(&p.agent_name, &p.task_id, &p.notes)
            }
            "reject_task" => {
                let p: RejectParams = parse(args)?;
                self.tasks.reject_task(&p.agent_name, &p.task_id, &p.reason)
            }
            "initiate_handshake" => {
                let p: InitiateHandshakeParams = parse(args)?;
                self.handshakes.initiate(&p.from_agent, &p.message, &p.agents)
            }
            "ack_handshake" => {
                let p: AckHandshakeParams = parse(args)?;
                self.handshakes.ack(&p.agent_name, p.handshake_id)
            }
            "handshake_status" => {
                let p: HandshakeStatusParams = parse(args)?;
                self.handshakes.status(p.handshake_id)
            }
            "declare_contract" => {
                let p: DeclareContractParams = parse(args)?;
                self.contracts
                    .declare(&p.agent_name, &p.name, &p.kind, &p.spec, &p.project)
            }
            "list_contracts" => {
                let p: ListContractsParams = parse(args)?;
                self.contracts.list(&p.project, &p.owner, &p.kind)
            }
            "set_spawn_policy" => {
                let p: SetSpawnPolicyParams = parse(args)?;
                self.minions
                    .set_policy(&p.agent_name, &p.scope, p.enabled, p.max_minions)
            }
            "get_spawn_policy" => {
                let p: AgentParams = parse(args)?;
                self.minions.get_policy(&p.agent_name)
            }
            "log_minion" => {
                let p: LogMinionParams = parse(args)?;
                self.minions
                    .log_minion(&p.agent_name, &p.task_description, &p.status, &p.result)
            }
            other => Ok(format!("Error: unknown tool '{other}'")),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|err| crate::error::Error::InvalidParams(err.to_string()))
}

// Named-parameter shapes, one per tool where they differ.

#[derive(Deserialize)]
struct AgentParams {
    agent_name: String,
}

#[derive(Deserialize)]
struct AgentStatusParams {
    agent_name: String,
    status: String,
}

#[derive(Deserialize)]
struct RegisterParams {
    agent_name: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
struct SendParams {
    from_agent: String,
    to_agent: String,
    message: String,
    #[serde(default)]
    cc: String,
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    reply_to: Option<i64>,
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_count")]
    count: i64,
    #[serde(default)]
    task_id: String,
}

fn default_history_count() -> i64 {
    10
}

#[derive(Deserialize)]
struct CreateTaskParams {
    creator: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    assign_to: String,
    #[serde(default)]
    project: String,
}

#[derive(Deserialize)]
struct UpdateTaskParams {
    agent_name: String,
    task_id: String,
    status: String,
    #[serde(default)]
    result: String,
}

#[derive(Deserialize)]
struct ListTasksParams {
    #[serde(default)]
    status: String,
    #[serde(default)]
    assigned_to: String,
    #[serde(default)]
    project: String,
}

#[derive(Deserialize)]
struct ReviewParams {
    agent_name: String,
    task_id: String,
    summary: String,
    #[serde(default)]
    files_changed: String,
    #[serde(default)]
    test_results: String,
}

#[derive(Deserialize)]
struct ApproveParams {
    agent_name: String,
    task_id: String,
    #[serde(default)]
    notes: String,
}

#[derive(Deserialize)]
struct RejectParams {
    agent_name: String,
    task_id: String,
    reason: String,
}

#[derive(Deserialize)]
struct InitiateHandshakeParams {
    from_agent: String,
    message: String,
    #[serde(default)]
    agents: String,
}

#[derive(Deserialize)]
struct AckHandshakeParams {
    agent_name: String,
    handshake_id: i64,
}

#[derive(Deserialize)]
struct HandshakeStatusParams {
    handshake_id: i64,
}

#[derive(Deserialize)]
struct DeclareContractParams {
    agent_name: String,
    name: String,
    kind: String,
    spec: String,
    #[serde(default)]
    project: String,
}

#[derive(Deserialize)]
struct ListContractsParams {
    #[serde(default)]
    project: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    kind: String,
}

#[derive(Deserialize)]
struct SetSpawnPolicyParams {
    agent_name: String,
    scope: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_max_minions")]
    max_minions: i64,
}

fn default_true() -> bool {
    true
}

fn default_max_minions() -> i64 {
    3
}

#[derive(Deserialize)]
struct LogMinionParams {
    agent_name: String,
    #[serde(default)]
    task_description: String,
    status: String,
    #[serde(default)]
    result: String,
}

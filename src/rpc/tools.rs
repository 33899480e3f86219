//! Tool catalogue
//!
//! Every operation the server exposes, with the JSON schema its named
//! parameters follow. Descriptions are what the calling LLM reads, so they
//! carry usage hints; `check_inbox` additionally gets a per-session unread
//! alert prefix injected at list time.

use serde_json::json;

use super::protocol::ToolDescriptor;

pub const CHECK_INBOX: &str = "check_inbox";

fn tool(
    name: &'static str,
    description: &str,
    properties: serde_json::Value,
    required: &[&str],
) -> ToolDescriptor {
    ToolDescriptor {
        name,
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// The complete method set, in the order clients see it.
pub fn catalog() -> Vec<ToolDescriptor> {
    vec![
        tool(
            "register",
            "Registers the caller into the system. Role: 'lead', 'researcher', 'coder', \
             'builder'. Description: what this agent does. Team: team name for multi-team \
             rooms. Token: room auth token (required if the server has one configured).",
            json!({
                "agent_name": { "type": "string" },
                "role": { "type": "string" },
                "description": { "type": "string" },
                "team": { "type": "string" },
                "token": { "type": "string" },
            }),
            &["agent_name"],
        ),
        tool(
            "set_status",
            "Set your current status (e.g. 'working on BUG-014', 'waiting for work'). \
             Shows up in who() output.",
            json!({
                "agent_name": { "type": "string" },
                "status": { "type": "string" },
            }),
            &["agent_name", "status"],
        ),
        tool(
            "send",
            "Sends a message to a specific agent name, or 'all' for broadcast. Optional: \
             cc (comma-separated carbon-copy list), task_id (link to task), reply_to \
             (message ID to reply to).",
            json!({
                "from_agent": { "type": "string" },
                "to_agent": { "type": "string" },
                "message": { "type": "string" },
                "cc": { "type": "string" },
                "task_id": { "type": "string" },
                "reply_to": { "type": "integer" },
            }),
            &["from_agent", "to_agent", "message"],
        ),
        tool(
            CHECK_INBOX,
            "Returns unread messages for the agent, marks them as read.",
            json!({
                "agent_name": { "type": "string" },
            }),
            &["agent_name"],
        ),
        tool(
            "get_history",
            "Returns the last N messages across all agents (for catch-up). Optional \
             task_id filter for a threaded conversation.",
            json!({
                "count": { "type": "integer" },
                "task_id": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "deregister",
            "Removes an agent from the registry. Use to clean up stale or ghost entries \
             from previous sessions.",
            json!({
                "agent_name": { "type": "string" },
            }),
            &["agent_name"],
        ),
        tool(
            "who",
            "Lists all registered agents with connection status and health. Health: \
             healthy (<2m), stale (<10m), dead (>=10m), unknown (no heartbeat).",
            json!({}),
            &[],
        ),
        tool(
            "ping",
            "Lightweight heartbeat. Call periodically (every 60s recommended) to signal \
             liveness. Updates health status in who().",
            json!({
                "agent_name": { "type": "string" },
            }),
            &["agent_name"],
        ),
        tool(
            "create_task",
            "Create a task. Optionally assign it immediately. Returns the task ID and \
             auto-sends the assignment message when assigned.",
            json!({
                "creator": { "type": "string" },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "assign_to": { "type": "string" },
                "project": { "type": "string" },
            }),
            &["creator", "title"],
        ),
        tool(
            "update_task",
            "Transition a task's status. Enforces valid transitions. A lead can assign, \
             approve, reject and reassign; the assignee can start, submit for review and \
             fail.",
            json!({
                "agent_name": { "type": "string" },
                "task_id": { "type": "string" },
                "status": { "type": "string" },
                "result": { "type": "string" },
            }),
            &["agent_name", "task_id", "status"],
        ),
        tool(
            "list_tasks",
            "List tasks. Filter by status, assigned_to, project. Default: all \
             non-completed tasks. Includes a health warning for dead assignees.",
            json!({
                "status": { "type": "string" },
                "assigned_to": { "type": "string" },
                "project": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "submit_for_review",
            "Submit a task for lead review. Transitions the task to 'review' and sends a \
             structured review message to every lead.",
            json!({
                "agent_name": { "type": "string" },
                "task_id": { "type": "string" },
                "summary": { "type": "string" },
                "files_changed": { "type": "string" },
                "test_results": { "type": "string" },
            }),
            &["agent_name", "task_id", "summary"],
        ),
        tool(
            "approve_task",
            "Lead approves a task in review. Transitions it to 'completed' and notifies \
             the assignee.",
            json!({
                "agent_name": { "type": "string" },
                "task_id": { "type": "string" },
                "notes": { "type": "string" },
            }),
            &["agent_name", "task_id"],
        ),
        tool(
            "reject_task",
            "Lead rejects a task in review. Sends it back to 'in_progress' for rework \
             with feedback.",
            json!({
                "agent_name": { "type": "string" },
                "task_id": { "type": "string" },
                "reason": { "type": "string" },
            }),
            &["agent_name", "task_id", "reason"],
        ),
        tool(
            "initiate_handshake",
            "Lead broadcasts a sync plan. All target agents must ACK before GO. Returns \
             the handshake ID. Agents: comma-separated names, or empty for every other \
             registered agent.",
            json!({
                "from_agent": { "type": "string" },
                "message": { "type": "string" },
                "agents": { "type": "string" },
            }),
            &["from_agent", "message"],
        ),
        tool(
            "ack_handshake",
            "Acknowledge a handshake. Call this after reading the plan to confirm you \
             understand it.",
            json!({
                "agent_name": { "type": "string" },
                "handshake_id": { "type": "integer" },
            }),
            &["agent_name", "handshake_id"],
        ),
        tool(
            "handshake_status",
            "Check the status of a handshake. Shows who has ACKed and who is still \
             pending.",
            json!({
                "handshake_id": { "type": "integer" },
            }),
            &["handshake_id"],
        ),
        tool(
            "declare_contract",
            "Declare or update a shared interface contract. Kinds: function, dom_id, \
             css_class, file_path, api_endpoint, event, other. Auto-broadcasts on a \
             version bump.",
            json!({
                "agent_name": { "type": "string" },
                "name": { "type": "string" },
                "kind": { "type": "string" },
                "spec": { "type": "string" },
                "project": { "type": "string" },
            }),
            &["agent_name", "name", "kind", "spec"],
        ),
        tool(
            "list_contracts",
            "List declared interface contracts. Filter by project, owner, kind.",
            json!({
                "project": { "type": "string" },
                "owner": { "type": "string" },
                "kind": { "type": "string" },
            }),
            &[],
        ),
        tool(
            "set_spawn_policy",
            "Set the minion spawn policy. Only leads can call this. Scope: 'global' or a \
             specific agent name. Controls whether agents may spawn minions and how many.",
            json!({
                "agent_name": { "type": "string" },
                "scope": { "type": "string" },
                "enabled": { "type": "boolean" },
                "max_minions": { "type": "integer" },
            }),
            &["agent_name", "scope"],
        ),
        tool(
            "get_spawn_policy",
            "Get the effective spawn policy for an agent: agent-specific first, then \
             global, then defaults. Returns enabled, max_minions, active_minions, \
             can_spawn.",
            json!({
                "agent_name": { "type": "string" },
            }),
            &["agent_name"],
        ),
        tool(
            "log_minion",
            "Log minion lifecycle events. Status: 'spawned', 'completed', 'failed'. \
             Spawned creates a new entry; completed/failed update the most recent \
             spawned entry for this pilot.",
            json!({
                "agent_name": { "type": "string" },
                "task_description": { "type": "string" },
                "status": { "type": "string" },
                "result": { "type": "string" },
            }),
            &["agent_name", "status"],
        ),
    ]
}

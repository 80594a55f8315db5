//! Instructions for the summarization call.

/// Final user turn appended to the history being summarized.
pub const SUMMARY_REQUEST: &str =
    "First, reason in your scratchpad. Then, generate the <state_snapshot>.";

/// Model acknowledgement placed after the summary in the rebuilt history.
pub const SUMMARY_ACK: &str = "Got it. Thanks for the additional context!";

/// System instruction for the summarization call.
pub fn compression_prompt() -> &'static str {
    r#"You are the component that condenses a long conversation history into a single structured snapshot.

When the conversation grows too large, you are invoked to distill the entire history into a concise XML snapshot. This snapshot is CRITICAL: it becomes the agent's *only* memory of the past. The agent resumes its work based solely on it. Preserve every crucial detail, plan, error, and user directive.

First, think through the entire history in a private <scratchpad>. Review the user's overall goal, the agent's actions, tool output, file modifications, and any unresolved questions. Identify every piece of information that is essential for future actions.

After your reasoning, generate the final <state_snapshot> XML object. Be dense with information and omit conversational filler.

The structure MUST be as follows:

<state_snapshot>
    <overall_goal>
        <!-- A single, concise sentence describing the user's high-level objective. -->
    </overall_goal>

    <key_knowledge>
        <!-- Crucial facts, conventions, and constraints the agent must remember, as bullet points. -->
    </key_knowledge>

    <file_system_state>
        <!-- Files that have been created, read, modified, or deleted, with critical learnings about each. -->
    </file_system_state>

    <recent_actions>
        <!-- A summary of the last few significant agent actions and their outcomes. Focus on facts. -->
    </recent_actions>

    <current_plan>
        <!-- The agent's step-by-step plan. Mark completed steps as [DONE], the current one as [IN PROGRESS], and the rest as [TODO]. -->
    </current_plan>
</state_snapshot>
"#
}

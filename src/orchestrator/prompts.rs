//! System prompts and instruction builders for the document and code stages.
//!
//! Proposal, consensus and review prompts live next to their components.

use super::state::RunState;

pub const PLAN_PROMPT: &str = r#"You are the project lead of a development council.

Write a Software Requirements Specification for the user's request as a
Markdown document with these sections, in order:

1. Introduction (purpose, scope, definitions)
2. Overall Description (product functions, users, environment, constraints)
3. System Requirements (functional, non-functional)
4. Execution Plan (task order and dependencies)
5. Verification and Acceptance Criteria

Output ONLY the document."#;

pub const MILESTONE_PROMPT: &str = r#"You are the project lead of a development council.

Split the project plan into 3 to 7 incremental milestones. Each milestone must
leave the project in a runnable state.

## Output Format (STRICT)
A single Markdown table and nothing else:

| # | Milestone | Deliverable |
|---|-----------|-------------|
| 1 | <short description> | <what can be run or shown> |"#;

pub const DIAGRAM_PROMPT: &str = r#"You are a software architect.

Draw the system architecture for the project plan and milestones as a Mermaid
diagram. Show components, data stores, and the direction of calls.

Output ONLY one ```mermaid fenced block."#;

pub const TECH_STACK_PROMPT: &str = r#"You are a software architect.

Choose the tech stack for the project: language, frameworks, storage, testing,
and tooling. Prefer a small number of mainstream, well-documented choices.

## Output Format
A Markdown list grouped by concern, one line of justification per choice."#;

pub const CODER_PROMPT: &str = r#"You are a senior software developer assigned to implement one milestone.

You will receive the milestone, the chosen implementation approach, the tech
stack, and the project plan. Existing project files may follow.

## Output Format (STRICT)
Output ONLY fenced code blocks. The fence label MUST be the exact relative file
path, never a language name:

```src/services/auth_service.py
def login():
    pass
```

To change an existing file without rewriting it, put one or more patch units in
the block instead of the full content:

```src/app.py
<<<<
exact existing lines
====
replacement lines
>>>>
```

## Rules
- Use ONLY the given tech stack.
- Write complete, working files with all imports and entry points.
- No prose and no explanations."#;

pub const CODER_REVISION_PROMPT: &str = r#"You are a senior software developer. Your previous code needs changes.

Address ALL of the feedback. Output ONLY the changed files as fenced code blocks
labelled with their exact relative path. Either give the complete file or use
patch units:

```src/app.py
<<<<
exact existing lines
====
replacement lines
>>>>
```

No prose and no explanations."#;

pub const INSTRUCTIONS_PROMPT: &str = r#"You are a technical writer creating a developer setup guide.

You will receive the milestone, the tech stack, and the generated code.

## Output Format (STRICT)
# How to Run: <milestone>

## Prerequisites
## Installation
## Running the Project
## Expected Output

Use the actual file names and commands from the code. Keep it under 200 words."#;

/// Follow-up turn asking a backend to revise its previous answer on the same thread.
pub fn revision_instruction(feedback: &str) -> String {
    format!(
        "The operator reviewed your previous answer and asked for changes:\n\n{}\n\nReturn the complete revised document in the same format.",
        feedback
    )
}

pub fn plan_instruction(state: &RunState) -> String {
    format!("## Request\n{}", state.request)
}

pub fn milestone_instruction(state: &RunState) -> String {
    format!("## Project Plan\n{}", state.plan)
}

pub fn diagram_instruction(state: &RunState) -> String {
    format!(
        "## Project Plan\n{}\n\n## Milestones\n{}",
        state.plan, state.milestone_plan
    )
}

pub fn tech_stack_instruction(state: &RunState) -> String {
    format!(
        "## Project Plan\n{}\n\n## Architecture (Mermaid)\n{}",
        state.plan, state.diagram_source
    )
}

/// Coder input for the active milestone. `existing_code` is the rendered code
/// tree from earlier milestones or attempts.
pub fn code_instruction(
    state: &RunState,
    milestone: &str,
    existing_code: Option<&str>,
    feedback: Option<&str>,
) -> String {
    let mut body = format!(
        "## Milestone {}\n{}\n\n## Chosen Approach\n{}\n\n## Tech Stack\n{}\n\n## Project Plan\n{}",
        state.active_milestone_index() + 1,
        milestone,
        state.chosen_approach,
        state.tech_stack,
        state.plan
    );
    if let Some(code) = existing_code {
        body.push_str("\n\n## Existing Project Files\n");
        body.push_str(code);
    }
    if let Some(feedback) = feedback {
        body.push_str("\n\n## Feedback To Address\n");
        body.push_str(feedback);
    }
    body
}

pub fn instructions_instruction(state: &RunState, milestone: &str, code: &str) -> String {
    format!(
        "## Milestone\n{}\n\n## Tech Stack\n{}\n\n## Generated Code\n{}",
        milestone, state.tech_stack, code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_instruction_sections() {
        let mut state = RunState::new("todo app", "/tmp/out");
        state.chosen_approach = "REST with FastAPI".into();
        state.tech_stack = "Python".into();

        let first = code_instruction(&state, "Build API", None, None);
        assert!(first.starts_with("## Milestone 1\nBuild API"));
        assert!(first.contains("REST with FastAPI"));
        assert!(!first.contains("Existing Project Files"));
        assert!(!first.contains("Feedback To Address"));

        let revised = code_instruction(
            &state,
            "Build API",
            Some("### File: app.py"),
            Some("server crashes on start"),
        );
        assert!(revised.contains("## Existing Project Files\n### File: app.py"));
        assert!(revised.ends_with("## Feedback To Address\nserver crashes on start"));
    }

    #[test]
    fn test_revision_instruction_quotes_feedback() {
        assert!(revision_instruction("more detail").contains("\n\nmore detail\n\n"));
    }
}

//! Property tests for the conversation state machine
//!
//! These drive whole turns through the pure transition function and check
//! the transcript-level invariants that every client of the machine relies
//! on.

use super::event::ReviewDecision;
use super::state::{CartUpdateInput, CatalogSearchInput, ToolCall, ToolInput};
use super::{transition, ConvContext, ConvState, Effect, Event};
use crate::store::{ChatMessage, Role, ToolResult};
use proptest::prelude::*;
use serde_json::json;

fn test_context() -> ConvContext {
    ConvContext::new("prop-conv", "test-model")
}

fn tool_input_strategy() -> impl Strategy<Value = ToolInput> {
    prop_oneof![
        "[a-z]{3,12}".prop_map(|pref| ToolInput::CatalogSearch(CatalogSearchInput {
            preference: pref,
            max_results: None,
        })),
        ("[a-z]{2,8}", 0u32..20).prop_map(|(product, qty)| ToolInput::CartUpdate(
            CartUpdateInput {
                product_id: product,
                quantity: qty,
            }
        )),
    ]
}

fn tool_calls_strategy() -> impl Strategy<Value = Vec<ToolCall>> {
    prop::collection::vec(tool_input_strategy(), 1..4).prop_map(|inputs| {
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| ToolCall::new(format!("call-{i}"), input))
            .collect()
    })
}

#[derive(Debug, Clone)]
enum ScriptedDecision {
    Continue,
    Update,
    Feedback(String),
}

fn decision_strategy() -> impl Strategy<Value = ScriptedDecision> {
    prop_oneof![
        Just(ScriptedDecision::Continue),
        Just(ScriptedDecision::Update),
        "[a-z ]{1,30}".prop_map(ScriptedDecision::Feedback),
    ]
}

/// Apply one event, folding append effects into the transcript. Panics on
/// transition errors - the scripts below only produce legal sequences.
fn step(state: &ConvState, transcript: &mut Vec<ChatMessage>, event: Event) -> ConvState {
    let result = transition(state, &test_context(), event).expect("legal scripted transition");
    for effect in &result.effects {
        if let Effect::AppendMessage { message } = effect {
            transcript.push(message.clone());
        }
    }
    result.new_state
}

/// Drive one complete turn: user message, a tool-calling response, a review
/// decision, tool completions as required, and a closing text response.
fn run_turn(
    calls: Vec<ToolCall>,
    decision: &ScriptedDecision,
    transcript: &mut Vec<ChatMessage>,
) -> ConvState {
    let mut state = step(
        &ConvState::Idle,
        transcript,
        Event::UserMessage {
            text: "find me something".to_string(),
        },
    );

    state = step(
        &state,
        transcript,
        Event::LlmResponse {
            text: String::new(),
            tool_calls: calls.clone(),
        },
    );

    let reviewed_id = calls[calls.len() - 1].id.clone();
    let decision = match decision {
        ScriptedDecision::Continue => ReviewDecision::Continue,
        ScriptedDecision::Update => ReviewDecision::Update {
            tool_call_id: reviewed_id,
            args: json!({"product_id": "px", "quantity": 1}),
        },
        ScriptedDecision::Feedback(text) => ReviewDecision::Feedback {
            tool_call_id: reviewed_id,
            text: text.clone(),
        },
    };
    state = step(&state, transcript, Event::Review { decision });

    // Approved paths execute every call serially
    while let ConvState::ToolExecuting { current_tool, .. } = &state {
        let event = Event::ToolComplete {
            tool_call_id: current_tool.id.clone(),
            result: ToolResult::success(current_tool.id.clone(), "ok".to_string()),
        };
        state = step(&state, transcript, event);
    }

    step(
        &state,
        transcript,
        Event::LlmResponse {
            text: "all done".to_string(),
            tool_calls: vec![],
        },
    )
}

/// Every assistant message with tool calls must be immediately followed by
/// tool-role messages whose ids match, in order.
fn assert_tool_ordering(transcript: &[ChatMessage]) {
    let mut i = 0;
    while i < transcript.len() {
        let msg = &transcript[i];
        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            for (offset, call) in msg.tool_calls.iter().enumerate() {
                let follower = transcript
                    .get(i + 1 + offset)
                    .unwrap_or_else(|| panic!("missing tool message for {}", call.id));
                assert_eq!(follower.role, Role::Tool);
                assert_eq!(follower.tool_call_id.as_deref(), Some(call.id.as_str()));
            }
            i += 1 + msg.tool_calls.len();
        } else {
            i += 1;
        }
    }
}

proptest! {
    /// Full turns preserve the assistant/tool-message ordering invariant and
    /// always come back to Idle.
    #[test]
    fn turn_preserves_tool_ordering(
        calls in tool_calls_strategy(),
        decision in decision_strategy(),
    ) {
        let mut transcript = Vec::new();
        let final_state = run_turn(calls, &decision, &mut transcript);
        prop_assert_eq!(final_state, ConvState::Idle);
        assert_tool_ordering(&transcript);
    }

    /// The transcript only ever grows: the transcript captured at each
    /// checkpoint boundary is a prefix of every later one (the replay law).
    #[test]
    fn transcript_is_append_only(
        calls in tool_calls_strategy(),
        decision in decision_strategy(),
    ) {
        let mut transcript: Vec<ChatMessage> = Vec::new();
        let mut snapshots: Vec<Vec<ChatMessage>> = Vec::new();
        let mut state = ConvState::Idle;

        let mut checkpoint = |state: ConvState, transcript: &Vec<ChatMessage>| {
            snapshots.push(transcript.clone());
            state
        };

        state = checkpoint(step(&state, &mut transcript, Event::UserMessage {
            text: "find me something".to_string(),
        }), &transcript);
        state = checkpoint(step(&state, &mut transcript, Event::LlmResponse {
            text: String::new(),
            tool_calls: calls.clone(),
        }), &transcript);

        let reviewed_id = calls[calls.len() - 1].id.clone();
        let review = match &decision {
            ScriptedDecision::Continue => ReviewDecision::Continue,
            ScriptedDecision::Update => ReviewDecision::Update {
                tool_call_id: reviewed_id,
                args: json!({"product_id": "px", "quantity": 1}),
            },
            ScriptedDecision::Feedback(text) => ReviewDecision::Feedback {
                tool_call_id: reviewed_id,
                text: text.clone(),
            },
        };
        state = checkpoint(step(&state, &mut transcript, Event::Review { decision: review }), &transcript);

        while let ConvState::ToolExecuting { current_tool, .. } = &state {
            let event = Event::ToolComplete {
                tool_call_id: current_tool.id.clone(),
                result: ToolResult::success(current_tool.id.clone(), "ok".to_string()),
            };
            state = checkpoint(step(&state, &mut transcript, event), &transcript);
        }

        state = checkpoint(step(&state, &mut transcript, Event::LlmResponse {
            text: "all done".to_string(),
            tool_calls: vec![],
        }), &transcript);

        for window in snapshots.windows(2) {
            prop_assert!(window[1].len() >= window[0].len());
            prop_assert_eq!(&window[1][..window[0].len()], window[0].as_slice());
        }
        prop_assert_eq!(state, ConvState::Idle);
    }

    /// `update` decisions replace only the argument mapping.
    #[test]
    fn update_preserves_identity(
        calls in tool_calls_strategy(),
        qty in 0u32..50,
    ) {
        let reviewed = calls[calls.len() - 1].clone();
        let result = transition(
            &ConvState::AwaitingReview { tool_calls: calls.clone() },
            &test_context(),
            Event::Review {
                decision: ReviewDecision::Update {
                    tool_call_id: reviewed.id.clone(),
                    args: json!({"product_id": "px", "quantity": qty}),
                },
            },
        ).unwrap();

        let ConvState::ToolExecuting { current_tool, remaining_tools } = &result.new_state else {
            panic!("expected ToolExecuting");
        };
        let mut executed = vec![current_tool.clone()];
        executed.extend(remaining_tools.iter().cloned());
        let updated = executed.last().unwrap();
        prop_assert_eq!(&updated.id, &reviewed.id);
        prop_assert_eq!(updated.name(), reviewed.name());
        // Untouched calls keep their inputs
        for (before, after) in calls.iter().zip(executed.iter()).take(calls.len() - 1) {
            prop_assert_eq!(before, after);
        }
    }

    /// `feedback` decisions never execute a tool.
    #[test]
    fn feedback_never_executes(
        calls in tool_calls_strategy(),
        text in "[a-z ]{1,40}",
    ) {
        let reviewed_id = calls[calls.len() - 1].id.clone();
        let result = transition(
            &ConvState::AwaitingReview { tool_calls: calls },
            &test_context(),
            Event::Review {
                decision: ReviewDecision::Feedback {
                    tool_call_id: reviewed_id,
                    text,
                },
            },
        ).unwrap();

        prop_assert!(
            !result.effects.iter().any(|e| matches!(e, Effect::ExecuteTool { .. })),
            "no ExecuteTool effect expected after feedback review"
        );
        prop_assert_eq!(result.new_state, ConvState::LlmRequesting { attempt: 1 });
    }

    /// Checkpointed state survives serialization unchanged.
    #[test]
    fn state_serde_round_trip(calls in tool_calls_strategy()) {
        let states = vec![
            ConvState::Idle,
            ConvState::LlmRequesting { attempt: 2 },
            ConvState::AwaitingReview { tool_calls: calls.clone() },
            ConvState::ToolExecuting {
                current_tool: calls[0].clone(),
                remaining_tools: calls[1..].to_vec(),
            },
        ];
        for state in states {
            let json = serde_json::to_string(&state).unwrap();
            let back: ConvState = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, state);
        }
    }
}

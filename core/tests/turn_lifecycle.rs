mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use tern_config::{ApprovalMode, Config};
use tern_core::TurnOutcome;
use tern_core::model::{ModelClient, ScriptStep, ScriptedRejection, ScriptedTurn};
use tern_core::turn::{PassthroughPreprocessor, Query, format_api_error};
use tern_protocol::{
  DisplayItem, Part, StreamErrorInfo, StreamEvent, StreamingState, ToolCallStatus,
  ToolConfirmationOutcome, UiEvent,
};

use support::*;

#[tokio::test]
async fn plain_answer_goes_responding_then_idle() {
  let mut h = HarnessBuilder::new(Config::default())
    .turn(vec![text("Hi "), text("there")])
    .start()
    .await;

  let outcome = h.tern.submit("hello").await.expect("submit");
  assert_eq!(outcome, TurnOutcome::Completed { tool_calls: 0 });
  h.wait_idle().await;

  assert_eq!(
    h.streaming_states(),
    vec![StreamingState::Responding, StreamingState::Idle]
  );
  assert_eq!(
    h.items(),
    vec![
      DisplayItem::User {
        text: "hello".to_string()
      },
      DisplayItem::Assistant {
        text: "Hi there".to_string()
      },
    ]
  );
  assert_eq!(h.model.requests().await, vec![vec![Part::text("hello")]]);
}

#[tokio::test]
async fn long_answers_are_finalized_at_paragraph_breaks() {
  let mut h = HarnessBuilder::new(Config::default())
    .turn(vec![text("First paragraph.\n\nSecond"), text(" paragraph.")])
    .start()
    .await;

  h.tern.submit("write two paragraphs").await.expect("submit");
  h.wait_idle().await;

  let items = h.items();
  assert_eq!(
    items[1..].to_vec(),
    vec![
      DisplayItem::Assistant {
        text: "First paragraph.\n\n".to_string()
      },
      DisplayItem::AssistantContent {
        text: "Second paragraph.".to_string()
      },
    ]
  );
}

#[tokio::test]
async fn blank_queries_are_ignored() {
  let mut h = HarnessBuilder::new(Config::default()).start().await;
  assert_eq!(
    h.tern.submit("   ").await.expect("submit"),
    TurnOutcome::Handled
  );
  h.wait_idle().await;
  assert!(h.items().is_empty());
  assert!(h.model.requests().await.is_empty());
}

#[tokio::test]
async fn queries_are_rejected_while_a_call_awaits_approval() {
  let mut h = HarnessBuilder::new(Config::default())
    .tool(ProbeTool::new("probe").confirming())
    .turn(vec![call("c1", "probe", json!({ "value": "x" }))])
    .turn(vec![text("ran it")])
    .start()
    .await;

  h.tern.submit("go").await.expect("submit");
  h.wait_for_status("c1", ToolCallStatus::AwaitingApproval)
    .await;
  assert_eq!(
    h.tern.streaming_state().await,
    StreamingState::WaitingForConfirmation
  );
  assert_eq!(
    h.tern.submit("something else").await.expect("submit"),
    TurnOutcome::Busy
  );
  let tracked = h.tern.orchestrator().tracked_calls().await;
  assert_eq!(tracked.len(), 1);
  assert!(!tracked[0].response_submitted);

  h.tern
    .respond("c1", ToolConfirmationOutcome::ProceedOnce)
    .await
    .expect("respond");
  h.wait_idle().await;

  assert_eq!(h.model.requests().await.len(), 2);
  assert_eq!(
    h.streaming_states(),
    vec![
      StreamingState::Responding,
      StreamingState::WaitingForConfirmation,
      StreamingState::Responding,
      StreamingState::Idle,
    ]
  );
}

#[tokio::test]
async fn cancelling_mid_stream_finalizes_partial_text() {
  let mut h = HarnessBuilder::new(Config::default())
    .scripted(ScriptedTurn {
      steps: vec![
        ScriptStep::Event(text("partial")),
        ScriptStep::Pause { pause_ms: 10_000 },
        ScriptStep::Event(text(" never shown")),
      ],
      reject: None,
    })
    .start()
    .await;

  let orchestrator = h.tern.orchestrator().clone();
  let turn =
    tokio::spawn(async move { orchestrator.submit_query(Query::from("talk"), false).await });
  h.wait_for(|event| matches!(event, UiEvent::PendingChanged(Some(_))))
    .await;

  assert!(h.tern.cancel().await);
  assert!(!h.tern.cancel().await);
  let outcome = tokio::time::timeout(Duration::from_secs(5), turn)
    .await
    .expect("turn finished")
    .expect("turn task")
    .expect("submit");
  assert_eq!(outcome, TurnOutcome::Cancelled);
  h.wait_idle().await;

  assert_eq!(
    h.items()[1..].to_vec(),
    vec![
      DisplayItem::Assistant {
        text: "partial".to_string()
      },
      DisplayItem::info("Request cancelled."),
    ]
  );
  assert_eq!(h.tern.streaming_state().await, StreamingState::Idle);
}

#[tokio::test]
async fn cancelling_during_execution_stops_the_turn() {
  let probe = ProbeTool::new("probe").with_delay(Duration::from_secs(30));
  let executions = probe.executions();
  let mut h = HarnessBuilder::new(Config::default())
    .tool(probe)
    .turn(vec![call("c1", "probe", json!({ "value": "x" }))])
    .turn(vec![text("must not be requested")])
    .start()
    .await;

  h.tern.submit("go").await.expect("submit");
  h.wait_for_status("c1", ToolCallStatus::Executing).await;
  assert!(h.tern.cancel().await);
  h.wait_idle().await;

  assert_eq!(executions.load(Ordering::SeqCst), 1);
  assert_eq!(h.statuses("c1").last(), Some(&ToolCallStatus::Cancelled));
  assert_eq!(h.model.requests().await.len(), 1);
  assert_eq!(h.model.remaining_turns().await, 1);

  let history = h.model.history().await;
  let last = history.last().expect("history entry");
  assert_eq!(
    function_responses(&last.parts),
    vec![(
      "c1".to_string(),
      json!({ "error": "[Operation Cancelled] Reason: User cancelled tool execution." })
    )]
  );
}

#[tokio::test]
async fn cancelling_a_mixed_batch_cancels_every_call() {
  let ask = ProbeTool::new("ask").confirming();
  let quick = ProbeTool::new("quick");
  let slow = ProbeTool::new("slow").with_delay(Duration::from_secs(30));
  let executions = [ask.executions(), quick.executions(), slow.executions()];
  let mut h = HarnessBuilder::new(Config::default())
    .tool(ask)
    .tool(quick)
    .tool(slow)
    .turn(vec![
      call("a", "ask", json!({ "value": "1" })),
      call("b", "quick", json!({ "value": "2" })),
      call("c", "slow", json!({ "value": "3" })),
    ])
    .turn(vec![text("must not be requested")])
    .start()
    .await;

  h.tern.submit("go").await.expect("submit");
  h.wait_for_status("a", ToolCallStatus::AwaitingApproval)
    .await;
  h.wait_for_status("b", ToolCallStatus::Scheduled).await;
  h.wait_for_status("c", ToolCallStatus::Scheduled).await;
  assert!(h.tern.cancel().await);
  h.wait_idle().await;

  for id in ["a", "b", "c"] {
    assert_eq!(h.statuses(id).last(), Some(&ToolCallStatus::Cancelled));
  }
  for count in &executions {
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }
  assert_eq!(h.model.requests().await.len(), 1);
  assert_eq!(h.model.remaining_turns().await, 1);

  let history = h.model.history().await;
  let recorded: Vec<String> = history[history.len() - 3..]
    .iter()
    .flat_map(|content| function_responses(&content.parts))
    .map(|(id, _)| id)
    .collect();
  assert_eq!(recorded, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn cancelling_during_memory_refresh_drops_the_continuation() {
  let mut config = Config::default();
  config.approval.mode = ApprovalMode::Yolo;
  let mut h = HarnessBuilder::new(config)
    .refresh_delay(Duration::from_millis(300))
    .turn(vec![call(
      "m1",
      "save_memory",
      json!({ "fact": "likes tea" }),
    )])
    .turn(vec![text("continuation ran")])
    .start()
    .await;

  h.tern.submit("remember tea").await.expect("submit");
  h.wait_for_status("m1", ToolCallStatus::Success).await;
  tokio::time::timeout(Duration::from_secs(5), async {
    while h.hooks.refreshes.load(Ordering::SeqCst) == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("refresh started");

  let state = tokio::time::timeout(Duration::from_millis(100), h.tern.streaming_state())
    .await
    .expect("turn state is free while the refresh runs");
  assert_eq!(state, StreamingState::Responding);
  assert!(h.tern.cancel().await);
  h.wait_idle().await;
  tokio::time::sleep(Duration::from_millis(100)).await;

  assert_eq!(h.model.requests().await.len(), 1);
  assert_eq!(h.model.remaining_turns().await, 1);
  assert_eq!(h.tern.streaming_state().await, StreamingState::Idle);
  let seen = h.seen();
  let cancelled_at = seen
    .iter()
    .position(|event| *event == UiEvent::ItemAdded(DisplayItem::info("Request cancelled.")))
    .expect("cancel notice");
  assert!(
    !seen[cancelled_at..]
      .iter()
      .any(|event| matches!(event, UiEvent::PendingChanged(Some(_))))
  );
}

#[tokio::test]
async fn cancelling_while_idle_does_nothing() {
  let h = HarnessBuilder::new(Config::default()).start().await;
  assert!(!h.tern.cancel().await);
}

#[tokio::test]
async fn memory_command_saves_and_refreshes_once() {
  let mut h = HarnessBuilder::new(Config::default()).start().await;

  let outcome = h
    .tern
    .submit("/memory add prefers green tea")
    .await
    .expect("submit");
  assert_eq!(outcome, TurnOutcome::Handled);
  h.wait_idle().await;

  assert_eq!(h.hooks.refreshes.load(Ordering::SeqCst), 1);
  assert!(h.model.requests().await.is_empty());
  assert!(
    h.items()
      .contains(&DisplayItem::info("Memory refreshed (1)"))
  );
  let saved = std::fs::read_to_string(h.root.path().join(".tern").join("MEMORY.md"))
    .expect("memory file");
  assert!(saved.contains("- prefers green tea"));

  h.tern.submit("/memory show").await.expect("submit");
  h.wait_idle().await;
  assert!(h.items().iter().any(|item| matches!(
    item,
    DisplayItem::Info { text } if text.starts_with("Current memory content:") && text.contains("prefers green tea")
  )));
  assert_eq!(h.hooks.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn passthrough_preprocessing_sends_commands_to_the_model() {
  let mut h = HarnessBuilder::new(Config::default())
    .preprocessor(Arc::new(PassthroughPreprocessor))
    .turn(vec![text("noted")])
    .start()
    .await;

  h.tern.submit("/memory show").await.expect("submit");
  h.wait_idle().await;

  assert_eq!(h.model.requests().await, vec![vec![Part::text("/memory show")]]);
  assert_eq!(h.hooks.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn file_mentions_are_inlined_into_the_request() {
  let mut h = HarnessBuilder::new(Config::default())
    .turn(vec![text("Looks fine.")])
    .start()
    .await;
  std::fs::write(h.root.path().join("notes.txt"), "alpha\nbeta\n").expect("write notes");

  h.tern.submit("review @notes.txt").await.expect("submit");
  h.wait_idle().await;

  let requests = h.model.requests().await;
  assert_eq!(requests.len(), 1);
  assert!(requests[0].contains(&Part::text("\nContent from @notes.txt:\n")));
  assert!(
    requests[0]
      .iter()
      .any(|part| part.as_text().is_some_and(|text| text.contains("alpha\nbeta")))
  );
}

#[tokio::test]
async fn rejected_requests_show_formatted_errors() {
  let mut h = HarnessBuilder::new(Config::default())
    .scripted(ScriptedTurn::rejected(ScriptedRejection::Api {
      message: "Resource exhausted".to_string(),
      status: Some(429),
    }))
    .start()
    .await;

  assert_eq!(
    h.tern.submit("hello").await.expect("submit"),
    TurnOutcome::Failed
  );
  h.wait_idle().await;
  assert_eq!(
    h.items().last(),
    Some(&DisplayItem::error(format_api_error(
      "Resource exhausted",
      Some(429)
    )))
  );
}

#[tokio::test]
async fn auth_failures_go_to_the_hook() {
  let mut h = HarnessBuilder::new(Config::default())
    .scripted(ScriptedTurn::rejected(ScriptedRejection::Unauthorized {
      message: "token expired".to_string(),
    }))
    .start()
    .await;

  assert_eq!(
    h.tern.submit("hello").await.expect("submit"),
    TurnOutcome::Failed
  );
  h.wait_idle().await;
  assert_eq!(
    *h.hooks.auth_errors.lock().await,
    vec!["token expired".to_string()]
  );
  assert!(
    !h.items()
      .iter()
      .any(|item| matches!(item, DisplayItem::Error { .. }))
  );
}

#[tokio::test]
async fn stream_errors_end_the_turn() {
  let mut h = HarnessBuilder::new(Config::default())
    .turn(vec![
      text("partial"),
      StreamEvent::Error(StreamErrorInfo {
        message: "overloaded".to_string(),
        status: Some(503),
      }),
    ])
    .start()
    .await;

  assert_eq!(
    h.tern.submit("hello").await.expect("submit"),
    TurnOutcome::Failed
  );
  h.wait_idle().await;
  assert_eq!(
    h.items()[1..].to_vec(),
    vec![
      DisplayItem::Assistant {
        text: "partial".to_string()
      },
      DisplayItem::error("[API Error: overloaded]"),
    ]
  );
}

#[tokio::test]
async fn compression_and_usage_are_surfaced() {
  let usage = tern_protocol::UsageMetadata {
    prompt_token_count: 10,
    candidates_token_count: 5,
    total_token_count: 15,
  };
  let mut h = HarnessBuilder::new(Config::default())
    .turn(vec![
      StreamEvent::ChatCompressed {
        original_token_count: 9000,
        new_token_count: 1200,
      },
      text("ok"),
      StreamEvent::UsageMetadata(usage),
    ])
    .start()
    .await;

  h.tern.submit("hello").await.expect("submit");
  h.wait_idle().await;

  assert!(h.items().iter().any(|item| matches!(
    item,
    DisplayItem::Info { text } if text.ends_with("(compressed from: 9000 to 1200 tokens).")
  )));
  assert!(h.seen().contains(&UiEvent::Usage(usage)));
}

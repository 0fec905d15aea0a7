mod common;

use apply_agent::hands::{self, DoneSignal};
use apply_agent::{
    ActionError, ActionOutcome, AgentAction, CheckpointKind, ExecContext, FileKind, PageError,
    ScrollDirection, Secrets, Timeouts, UploadFiles,
};
use common::*;
use std::time::Duration;

fn timeouts() -> Timeouts {
    Timeouts {
        action: Duration::from_secs(10),
        navigation: Duration::from_secs(30),
        network_idle: Duration::from_secs(5),
    }
}

async fn run(page: &FakePage, action: AgentAction) -> Result<ActionOutcome, ActionError> {
    let files = UploadFiles::prepare("resume body", None, None).unwrap();
    let secrets = Secrets::default();
    let ctx = ExecContext {
        timeouts: timeouts(),
        files: &files,
        secrets: &secrets,
    };
    hands::execute(page, &action, &ctx).await
}

fn log(page: &FakePage) -> Vec<String> {
    page.log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_click_fill_select_check() {
    let page = FakePage::new(PageScript::with_selectors(&["#go", "#name", "#country", "#tos"]));

    assert_eq!(run(&page, click("#go")).await.unwrap(), ActionOutcome::Continue);
    assert_eq!(run(&page, fill("#name", "Ada")).await.unwrap(), ActionOutcome::Continue);
    let select = AgentAction::Select {
        selector: Some("#country".into()),
        value: Some("UK".into()),
        reason: "country".into(),
    };
    assert_eq!(run(&page, select).await.unwrap(), ActionOutcome::Continue);
    let check = AgentAction::Check {
        selector: Some("#tos".into()),
        checked: true,
        reason: "accept terms".into(),
    };
    assert_eq!(run(&page, check).await.unwrap(), ActionOutcome::Continue);

    assert_eq!(
        log(&page),
        vec!["click #go", "fill #name", "select #country", "check #tos true"]
    );
    let values = page.values.lock().unwrap().clone();
    assert_eq!(values.get("#name").map(String::as_str), Some("Ada"));
    assert_eq!(values.get("#country").map(String::as_str), Some("UK"));
}

#[tokio::test]
async fn test_navigate_and_scroll_defaults() {
    let page = FakePage::new(PageScript::default());
    let navigate = AgentAction::Navigate {
        url: Some("https://jobs.example.com/next".into()),
        reason: "next page".into(),
    };
    run(&page, navigate).await.unwrap();
    run(&page, scroll()).await.unwrap();
    let up = AgentAction::Scroll {
        direction: Some(ScrollDirection::Up),
        amount: Some(200),
        reason: "back up".into(),
    };
    run(&page, up).await.unwrap();

    assert_eq!(
        log(&page),
        vec![
            "goto https://jobs.example.com/next",
            "scroll Down 600",
            "scroll Up 200"
        ]
    );
}

#[tokio::test]
async fn test_missing_fields_are_reported() {
    let page = FakePage::new(PageScript::default());
    let no_selector = AgentAction::Click {
        selector: None,
        reason: "oops".into(),
    };
    let err = run(&page, no_selector).await.unwrap_err();
    assert!(matches!(
        err,
        ActionError::MissingField {
            action: "click",
            field: "selector"
        }
    ));

    let no_value = AgentAction::Fill {
        selector: Some("#name".into()),
        value: None,
        reason: "oops".into(),
    };
    let err = run(&page, no_value).await.unwrap_err();
    assert_eq!(err.to_string(), "fill requires 'value'");

    let no_kind = AgentAction::Upload {
        selector: Some("input[type=file]".into()),
        file_type: None,
        reason: "oops".into(),
    };
    assert!(matches!(
        run(&page, no_kind).await.unwrap_err(),
        ActionError::MissingField {
            field: "fileType",
            ..
        }
    ));
    assert!(log(&page).is_empty());
}

#[tokio::test]
async fn test_missing_element_carries_page_error() {
    let page = FakePage::new(PageScript::default());
    let err = run(&page, click("#nope")).await.unwrap_err();
    assert!(matches!(
        err.page_error(),
        Some(PageError::ElementNotFound { selector }) if selector == "#nope"
    ));
}

#[tokio::test]
async fn test_upload_without_cover_letter_fails() {
    let page = FakePage::new(PageScript::with_selectors(&["#cl"]));
    let upload = AgentAction::Upload {
        selector: Some("#cl".into()),
        file_type: Some(FileKind::CoverLetter),
        reason: "attach cover letter".into(),
    };
    let err = run(&page, upload).await.unwrap_err();
    assert!(matches!(err, ActionError::NoFile(_)));
    assert!(log(&page).is_empty());
}

#[tokio::test]
async fn test_upload_resume_sends_materialized_file() {
    let page = FakePage::new(PageScript::with_selectors(&["#cv"]));
    let upload = AgentAction::Upload {
        selector: Some("#cv".into()),
        file_type: Some(FileKind::Resume),
        reason: "attach resume".into(),
    };
    run(&page, upload).await.unwrap();
    let values = page.values.lock().unwrap().clone();
    assert_eq!(values.get("#cv").map(String::as_str), Some("resume body"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_element_times_out() {
    let mut script = PageScript::with_selectors(&["#slow"]);
    script.hanging.insert("#slow".into());
    let page = FakePage::new(script);

    let started = tokio::time::Instant::now();
    let err = run(&page, click("#slow")).await.unwrap_err();

    assert!(matches!(
        err,
        ActionError::Timeout { action: "click", ref selector, timeout }
            if selector == "#slow" && timeout == Duration::from_secs(10)
    ));
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_network_idle_hang_does_not_fail_action() {
    let script = PageScript {
        idle_hangs: true,
        ..PageScript::with_selectors(&["#next"])
    };
    let page = FakePage::new(script);

    let started = tokio::time::Instant::now();
    assert_eq!(run(&page, click("#next")).await.unwrap(), ActionOutcome::Continue);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_wait_is_capped_by_action_timeout() {
    let page = FakePage::new(PageScript::default());
    let wait = AgentAction::Wait {
        duration_ms: Some(60_000),
        reason: "let the page load".into(),
    };
    let started = tokio::time::Instant::now();
    run(&page, wait).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
}

#[tokio::test]
async fn test_control_actions_leave_page_alone() {
    let page = FakePage::new(PageScript::default());

    let outcome = run(&page, checkpoint(CheckpointKind::Captcha, "Solve the puzzle"))
        .await
        .unwrap();
    match outcome {
        ActionOutcome::Checkpoint(request) => {
            assert_eq!(request.kind, CheckpointKind::Captcha);
            assert_eq!(request.message, "Solve the puzzle");
        }
        other => panic!("expected checkpoint, got {:?}", other),
    }

    let finished = AgentAction::Done {
        success: true,
        message: "Submitted".into(),
        confirmation_id: Some("APP-123".into()),
        reason: "confirmation page".into(),
    };
    assert_eq!(
        run(&page, finished).await.unwrap(),
        ActionOutcome::Done(DoneSignal {
            success: true,
            message: "Submitted".into(),
            confirmation_id: Some("APP-123".into()),
        })
    );
    assert!(log(&page).is_empty());
}

#[tokio::test]
async fn test_empty_value_clears_field() {
    let page = FakePage::new(PageScript::with_selectors(&["#notes"]));
    assert_eq!(run(&page, fill("#notes", "")).await.unwrap(), ActionOutcome::Continue);
    let values = page.values.lock().unwrap().clone();
    assert_eq!(values.get("#notes").map(String::as_str), Some(""));
}

#[tokio::test]
async fn test_late_click_lands_before_executor_returns() {
    let mut script = PageScript::default();
    script
        .slow_clicks
        .insert("#submit".into(), Duration::from_millis(300));
    let page = FakePage::new(script);
    let files = UploadFiles::prepare("resume body", None, None).unwrap();
    let secrets = Secrets::default();
    let ctx = ExecContext {
        timeouts: Timeouts {
            action: Duration::from_millis(200),
            navigation: Duration::from_secs(1),
            network_idle: Duration::from_millis(50),
        },
        files: &files,
        secrets: &secrets,
    };

    let outcome = hands::execute(&page, &click("#submit"), &ctx).await;

    assert_eq!(log(&page), vec!["click #submit"]);
    assert_eq!(outcome.unwrap(), ActionOutcome::Continue);
}

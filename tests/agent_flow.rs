//! End-to-end agent scenarios over a scripted driver and planner.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{plan_of, FakeDriver, FakePage, ScriptedPlanner};
use taskpilot::actions::{Action, BestCriteria};
use taskpilot::agent::{TaskAgent, TaskStatus};
use taskpilot::analyzer::PageAnalyzer;
use taskpilot::cache::UiCache;
use taskpilot::credentials::CredentialStore;
use taskpilot::executor::ActionExecutor;
use taskpilot::fsm::AgentState;

fn make_executor(driver: Arc<FakeDriver>) -> ActionExecutor {
    ActionExecutor::new(
        driver,
        PageAnalyzer::new(Duration::from_millis(0)),
        UiCache::open(None, 100, 24),
        CredentialStore::open(None),
        Duration::from_secs(30),
    )
}

fn make_agent(
    driver: Arc<FakeDriver>,
    planner: Arc<ScriptedPlanner>,
    require_approval: bool,
) -> TaskAgent {
    TaskAgent::new(make_executor(driver), planner, require_approval, 2)
}

fn duckduckgo_page() -> FakePage {
    FakePage::new("DuckDuckGo", "Search the web. Results below. Privacy matters here.")
        .with_selectors(&["input[name='q']", "article"])
        .with_snapshot_extras(json!({
            "inputs": [
                {"tag": "input", "name": "q", "type": "text", "placeholder": "Search"}
            ],
            "buttons": [
                {"tag": "button", "text": "Search", "type": "submit"}
            ],
            "hasResults": true
        }))
        .with_extraction(json!({
            "count": 3,
            "items": [
                {"title": "Python Tutorial - W3Schools", "price": null,
                 "link": "https://www.w3schools.com/python/"},
                {"title": "The Python Tutorial - docs.python.org", "price": null,
                 "link": "https://docs.python.org/3/tutorial/"},
                {"title": "Learn Python - Free Interactive Tutorial", "price": null,
                 "link": "https://www.learnpython.org/"}
            ]
        }))
}

#[tokio::test(start_paused = true)]
async fn happy_path_search_completes_with_results() {
    let driver = Arc::new(FakeDriver::new(
        "about:blank",
        vec![("https://duckduckgo.com", duckduckgo_page())],
    ));
    let planner = Arc::new(ScriptedPlanner::new(vec![plan_of(vec![
        Action::Navigate {
            url: "https://duckduckgo.com".into(),
        },
        Action::Wait {
            selector: "input[name='q']".into(),
            timeout: 10,
        },
        Action::Type {
            selector: "input[name='q']".into(),
            text: "Python tutorials".into(),
            press_enter: true,
        },
        Action::Wait {
            selector: "article".into(),
            timeout: 15,
        },
        Action::Extract {
            strategy: "auto".into(),
            top_n: 5,
        },
    ])]));

    let mut agent = make_agent(driver.clone(), planner.clone(), false);
    let report = agent
        .run("Search for Python tutorials on DuckDuckGo")
        .await;

    assert_eq!(report.status, TaskStatus::Success);
    assert_eq!(report.final_state, AgentState::Completed);
    assert_eq!(report.recovery_attempts, 0);
    assert_eq!(report.steps_executed, 5);
    assert_eq!(
        driver.navigations.lock().unwrap().as_slice(),
        ["https://duckduckgo.com"]
    );
    assert_eq!(planner.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_replans_from_fresh_analysis_and_finishes_the_goal() {
    let goal = "Buy cheapest wireless mouse from Amazon";
    let product_page = FakePage::new(
        "Wireless Mouse - Product",
        "Wireless mouse product detail page with plenty of description text.",
    )
    .with_selectors(&["#add-to-cart-button"]);

    let driver = Arc::new(FakeDriver::new(
        "https://amazon.in/dp/B123",
        vec![("https://amazon.in/dp/B123", product_page)],
    ));
    let planner = Arc::new(ScriptedPlanner::new(vec![
        plan_of(vec![Action::Click {
            selector: ".old-button".into(),
        }]),
        plan_of(vec![
            Action::Wait {
                selector: "#add-to-cart-button".into(),
                timeout: 10,
            },
            Action::AddToCart,
        ]),
    ]));

    let mut agent = make_agent(driver, planner.clone(), false);
    let report = agent.run(goal).await;

    assert_eq!(report.status, TaskStatus::Success);
    assert_eq!(report.recovery_attempts, 1);
    // Failed click + recovery wait + add_to_cart.
    assert_eq!(report.steps_executed, 3);

    let calls = planner.calls();
    assert_eq!(calls.len(), 2);
    // The goal is byte-identical across every planner call.
    assert!(calls.iter().all(|call| call.goal == goal));
    // The recovery call carries the failure context.
    assert!(calls[0].error_message.is_none());
    let recovery = &calls[1];
    assert!(recovery
        .error_message
        .as_deref()
        .is_some_and(|msg| msg.contains("step 1 failed")));
    assert_eq!(
        recovery.failed_action,
        Some(Action::Click {
            selector: ".old-button".into()
        })
    );
    // The recovery call planned against a real fresh analysis, not the
    // error placeholder.
    assert!(recovery.ui_summary.contains("=== PAGE ANALYSIS ==="));
}

#[tokio::test(start_paused = true)]
async fn rejected_approval_cancels_before_any_page_action() {
    let driver = Arc::new(FakeDriver::new("about:blank", vec![]));
    let planner = Arc::new(ScriptedPlanner::new(vec![plan_of(vec![
        Action::Navigate {
            url: "https://example.com/login".into(),
        },
        Action::AutoLogin {
            username_selector: None,
            password_selector: None,
            submit_selector: None,
        },
    ])]));

    let mut agent = make_agent(driver.clone(), planner, true);
    agent.set_approval_callback(Box::new(|_| false));
    let report = agent.run("login to example.com").await;

    assert_eq!(report.status, TaskStatus::Cancelled);
    assert_eq!(report.final_state, AgentState::Cancelled);
    assert_eq!(report.steps_executed, 0);
    assert!(driver.navigations.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn approval_is_skipped_for_plans_without_risky_actions() {
    let driver = Arc::new(FakeDriver::new(
        "about:blank",
        vec![("https://duckduckgo.com", duckduckgo_page())],
    ));
    let planner = Arc::new(ScriptedPlanner::new(vec![plan_of(vec![
        Action::Navigate {
            url: "https://duckduckgo.com".into(),
        },
    ])]));

    let mut agent = make_agent(driver, planner, true);
    // A rejecting callback that must never be consulted.
    agent.set_approval_callback(Box::new(|_| false));
    let report = agent.run("open duckduckgo").await;

    assert_eq!(report.status, TaskStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn wait_soft_succeeds_when_page_has_content() {
    let page = FakePage::new("Docs", &"long page text ".repeat(40));
    let driver = Arc::new(FakeDriver::new(
        "https://docs.example.com",
        vec![("https://docs.example.com", page)],
    ));
    let planner = Arc::new(ScriptedPlanner::new(vec![plan_of(vec![Action::Wait {
        selector: "#never-appears".into(),
        timeout: 5,
    }])]));

    let mut agent = make_agent(driver, planner, false);
    let report = agent.run("read the docs page").await;

    assert_eq!(report.status, TaskStatus::Success);
    assert_eq!(report.steps_executed, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_recovery_terminates_with_error_and_full_log() {
    let driver = Arc::new(FakeDriver::new("https://empty.example.com", vec![]));
    // The same broken plan is replayed for the initial attempt and both
    // recoveries.
    let planner = Arc::new(ScriptedPlanner::new(vec![plan_of(vec![Action::Click {
        selector: "#missing".into(),
    }])]));

    let mut agent = make_agent(driver, planner.clone(), false);
    let report = agent.run("click the missing button").await;

    assert_eq!(report.status, TaskStatus::Error);
    assert_eq!(report.final_state, AgentState::Completed);
    assert_eq!(report.recovery_attempts, 2);
    // Initial attempt plus two recovery attempts are all in the log.
    assert_eq!(report.steps_executed, 3);
    assert!(report
        .error
        .as_deref()
        .is_some_and(|err| err.contains("recovery exhausted after 2 attempts")));
    assert_eq!(planner.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_analysis_of_unchanged_page_is_served_from_cache() {
    let driver = Arc::new(FakeDriver::new(
        "https://duckduckgo.com",
        vec![("https://duckduckgo.com", duckduckgo_page())],
    ));
    let mut executor = make_executor(driver);

    let first = executor.page_context(false).await;
    let second = executor.page_context(false).await;

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.ui_text, second.ui_text);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(executor.cache_stats().total_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn driver_failure_invalidates_the_cache_for_the_current_url() {
    let driver = Arc::new(FakeDriver::new(
        "https://duckduckgo.com",
        vec![("https://duckduckgo.com", duckduckgo_page())],
    ));
    let mut executor = make_executor(driver);

    executor.page_context(false).await;
    assert_eq!(executor.cache_stats().entries, 1);

    let result = executor
        .execute(&Action::Click {
            selector: "#nope".into(),
        })
        .await;
    assert!(!result.is_success());
    assert_eq!(executor.cache_stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn find_best_navigates_to_the_cheapest_item() {
    let results_page = FakePage::new(
        "Search results",
        "A long results page listing many wireless mice with prices.",
    )
    .with_extraction(json!({
        "count": 3,
        "items": [
            {"title": "Fancy Mouse", "price": "₹1,299.50",
             "link": "https://shop.example/fancy"},
            {"title": "Budget Mouse", "price": "₹299",
             "link": "https://shop.example/budget"},
            {"title": "Free Brochure", "price": "Free",
             "link": "https://shop.example/brochure"}
        ]
    }));
    let driver = Arc::new(FakeDriver::new(
        "https://shop.example/search",
        vec![("https://shop.example/search", results_page)],
    ));
    let mut executor = make_executor(driver.clone());

    let result = executor
        .execute(&Action::FindBest {
            criteria: BestCriteria::Cheapest,
        })
        .await;

    assert!(result.is_success());
    assert_eq!(
        driver.navigations.lock().unwrap().as_slice(),
        ["https://shop.example/budget"]
    );
}

#[tokio::test(start_paused = true)]
async fn type_falls_back_to_common_input_selectors() {
    let page = FakePage::new("Search", "A search page with a generic input box and text.")
        .with_selectors(&["input[type='text']"]);
    let driver = Arc::new(FakeDriver::new(
        "https://search.example.com",
        vec![("https://search.example.com", page)],
    ));
    let mut executor = make_executor(driver);

    let result = executor
        .execute(&Action::Type {
            selector: "#search-box-that-moved".into(),
            text: "query".into(),
            press_enter: false,
        })
        .await;

    assert!(result.is_success());
    assert_eq!(
        result.payload.unwrap()["selector"],
        json!("input[type='text']")
    );
}

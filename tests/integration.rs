//! Integration tests against a real Chrome
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use settle::{
    BasePage, Browser, Condition, Driver, InteractionOutcome, LaunchConfig, Locator, WaitSpec,
};

/// Check if Chrome is available
fn chrome_available() -> bool {
    settle::browser::find_chrome().is_ok()
}

/// Inline document served through a data: URL
fn data_url(html: &str) -> String {
    format!("data:text/html,{}", html.replace('#', "%23"))
}

async fn open(html: &str) -> (Browser, BasePage) {
    let browser = Browser::launch(LaunchConfig::default())
        .await
        .expect("Failed to launch browser");
    let driver = browser
        .new_driver("about:blank")
        .await
        .expect("Failed to open tab");
    let page = BasePage::new(Arc::new(driver));
    page.navigate(&data_url(html))
        .await
        .expect("Failed to navigate");
    (browser, page)
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_browser_launch() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let browser = Browser::launch(LaunchConfig::default())
        .await
        .expect("Failed to launch browser");
    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_page_title_and_url() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open("<title>Test Title</title><body>Content</body>").await;
    assert_eq!(page.title().await.expect("title"), "Test Title");
    assert!(page
        .current_url()
        .await
        .expect("url")
        .starts_with("data:text/html"));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_find_and_read_text() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open(
        r#"<ul><li class="item">Alpha</li><li class="item"> Beta </li><li class="item" style="display:none">Gamma</li></ul>"#,
    )
    .await;

    assert_eq!(
        page.text_of(&Locator::css("li.item")).await.expect("text"),
        "Alpha"
    );
    assert_eq!(
        page.visible_texts(&Locator::css("li.item"))
            .await
            .expect("texts"),
        vec!["Alpha".to_string(), "Beta".to_string()]
    );
    let err = page
        .nth(&Locator::css("li.item"), 5, WaitSpec::short())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        settle::Error::IndexOutOfRange { index: 5, len: 3 }
    ));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_click_and_type() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open(
        r#"<input id="q"><button id="go" onclick="document.getElementById('out').textContent = document.getElementById('q').value">Go</button><p id="out"></p>"#,
    )
    .await;

    page.type_text(&Locator::id("q"), "mug").await.expect("type");
    let outcome = page.click(&Locator::id("go")).await.expect("click");
    assert_eq!(outcome, InteractionOutcome::Success);
    page.sync()
        .wait(
            &Condition::TextChanged {
                locator: Locator::id("out"),
                previous: String::new(),
            },
            WaitSpec::short(),
        )
        .await
        .expect("text change");
    assert_eq!(page.text_of(&Locator::id("out")).await.expect("text"), "mug");

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_covered_button_gets_scripted_click() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open(
        r#"<button id="buy" onclick="this.textContent='bought'">Buy</button><div class="overlay" style="position:fixed;inset:0;background:rgba(0,0,0,.3)"></div>"#,
    )
    .await;

    let outcome = page
        .interactor()
        .click(&Locator::id("buy"), WaitSpec::from_secs(1))
        .await
        .expect("click");
    assert_eq!(outcome, InteractionOutcome::ScriptedFallback);
    assert_eq!(
        page.text_of(&Locator::id("buy")).await.expect("text"),
        "bought"
    );

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_delayed_element_and_timeout() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open(
        r#"<script>setTimeout(() => { const p = document.createElement('p'); p.id = 'late'; p.textContent = 'here'; document.body.appendChild(p); }, 500)</script>"#,
    )
    .await;

    assert!(page.is_displayed(&Locator::id("late"), Duration::from_secs(5)).await);

    let err = page
        .sync()
        .wait_visible(&Locator::id("never"), WaitSpec::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("visible(id=never)"));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_screenshot() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let (browser, page) = open("<h1>Screenshot</h1>").await;
    let dir = tempfile::tempdir().expect("tempdir");
    let path = page
        .capture_screenshot(dir.path(), "smoke")
        .await
        .expect("Failed to take screenshot");

    let png = std::fs::read(&path).expect("read screenshot");
    assert!(png.starts_with(&[0x89, 0x50, 0x4E, 0x47]));

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_released_handles_go_stale() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let browser = Browser::launch(LaunchConfig::default())
        .await
        .expect("Failed to launch browser");
    let driver = Arc::new(browser.new_driver("about:blank").await.expect("tab"));
    let page = BasePage::new(driver.clone());
    page.navigate(&data_url(r#"<p id="msg">hello</p>"#))
        .await
        .expect("Failed to navigate");

    let old = page.find(&Locator::id("msg")).await.expect("find");
    driver.release_handles().await.expect("release");
    let err = driver.text(&old).await.unwrap_err();
    assert!(matches!(err, settle::Error::StaleElement(_)), "{err:?}");
    assert_eq!(
        page.text_of(&Locator::id("msg")).await.expect("text"),
        "hello"
    );

    browser.close().await.expect("Failed to close browser");
}

use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::driver::{DriverError, SessionDriver, SessionHandle};
use crate::poll::{Clock, PollPolicy, poll_until};
use crate::remote::{self, ActionOutcome, RemoteProfile};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("{0} not found")]
    Missing(&'static str),
}

/// Deletes the newest generation from the remote listing.
///
/// Callers treat every error as a warning; this only bounds the remote
/// account's storage and says nothing about the local asset.
pub async fn delete_latest_generation(
    driver: &dyn SessionDriver,
    handle: &SessionHandle,
    profile: &RemoteProfile,
    listing_url: &str,
    clock: &dyn Clock,
) -> Result<(), CleanupError> {
    driver.evaluate(handle, &remote::navigate(listing_url)).await?;

    let menu_script = profile.open_latest_menu();
    let menu_script = menu_script.as_str();
    let (opened, _) = poll_until(
        clock,
        PollPolicy::checks(10, Duration::from_secs(1)),
        move || async move {
            match driver.evaluate(handle, menu_script).await {
                Ok(raw) if remote::parse_action(&raw) == ActionOutcome::Done => Some(()),
                _ => None,
            }
        },
    )
    .await;
    opened.ok_or(CleanupError::Missing("overflow menu"))?;

    clock.sleep(Duration::from_millis(500)).await;
    expect_done(driver, handle, &profile.click_delete_item(), "delete menu item").await?;
    clock.sleep(Duration::from_millis(500)).await;
    expect_done(driver, handle, &profile.confirm_delete(), "delete confirmation").await?;

    info!(target = "stager.cleanup", session = %handle.id(), "remote_generation_deleted");
    Ok(())
}

async fn expect_done(
    driver: &dyn SessionDriver,
    handle: &SessionHandle,
    script: &str,
    what: &'static str,
) -> Result<(), CleanupError> {
    match remote::parse_action(&driver.evaluate(handle, script).await?) {
        ActionOutcome::Done => Ok(()),
        _ => Err(CleanupError::Missing(what)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tag;
    use crate::testing::{ManualClock, ScriptedDriver};

    #[tokio::test]
    async fn deletes_through_menu_and_confirmation() {
        let clock = ManualClock::new();
        let driver = ScriptedDriver::happy_path()
            .respond(tag::OPEN_LATEST_MENU, ["not_found", "not_found", "opened"]);
        let handle = SessionHandle::new("7");
        delete_latest_generation(
            &driver,
            &handle,
            &RemoteProfile::default(),
            "https://gen.example/assets",
            &clock,
        )
        .await
        .expect("cleanup");
        assert_eq!(
            driver.tags(),
            vec![
                tag::NAVIGATE,
                tag::OPEN_LATEST_MENU,
                tag::OPEN_LATEST_MENU,
                tag::OPEN_LATEST_MENU,
                tag::CLICK_MENU_ITEM,
                tag::CONFIRM_DIALOG,
            ]
        );
    }

    #[tokio::test]
    async fn missing_confirmation_is_reported() {
        let clock = ManualClock::new();
        let driver = ScriptedDriver::happy_path().respond(tag::CONFIRM_DIALOG, ["not_found"]);
        let handle = SessionHandle::new("7");
        let err = delete_latest_generation(
            &driver,
            &handle,
            &RemoteProfile::default(),
            "https://gen.example/assets",
            &clock,
        )
        .await
        .expect_err("no dialog");
        assert!(matches!(err, CleanupError::Missing("delete confirmation")));
    }
}

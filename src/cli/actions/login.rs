//! The `login` action: hydrates a stored session if one exists, otherwise
//! drives the interactive sign-in handshake until the operator is
//! authenticated or gives up.

use crate::{
    api::ApiClient,
    auth::{
        flow::Handshake,
        session::{FileSessionStore, SessionEstablisher, SessionHandle, SessionStore},
    },
    cli::{actions::Action, globals::GlobalArgs},
    console::{self, ConsoleNavigator, ConsoleUi},
};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Handle the login action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    let Action::Login {
        account,
        fresh,
        destination,
    } = action
    else {
        return Err(anyhow!("unexpected action"));
    };

    let store: Arc<dyn SessionStore> =
        Arc::new(FileSessionStore::new(globals.session_file.clone()));

    if !fresh {
        if let Some(session) = store.load()? {
            println!(
                "Already signed in as {}. Run `cassa logout` or pass --fresh to sign in again.",
                session.profile.account
            );
            return Ok(());
        }
    }

    let handle = SessionHandle::default();

    let store_for_hook = store.clone();
    let handle_for_hook = handle.clone();
    let api = ApiClient::new(&globals.api_url, globals.timeout)?.with_unauthorized_hook(Arc::new(
        move || {
            // Any 401 means the persisted session is stale.
            if let Err(err) = store_for_hook.clear() {
                warn!("failed to clear session: {err}");
            }
            handle_for_hook.clear();
        },
    ));

    match api.health().await {
        Ok(health) => info!("{} {} ({})", health.name, health.version, health.build),
        Err(err) => warn!("health probe failed: {err}"),
    }

    let establisher = SessionEstablisher::new(store, handle.clone());
    let mut flow = Handshake::new(
        api,
        Arc::new(ConsoleUi),
        Arc::new(ConsoleNavigator),
        establisher,
    )
    .with_destination(&destination);

    while !handle.is_authenticated() {
        if flow.captcha().is_none() {
            flow.refresh_captcha().await?;
        }
        let Some(challenge) = flow.captcha().cloned() else {
            return Err(anyhow!("no CAPTCHA challenge available"));
        };
        let captcha_path = console::write_captcha_image(&challenge)?;

        let account_input = match &account {
            Some(account) => account.clone(),
            None => console::prompt_account()?,
        };
        if account_input.is_empty() {
            println!("Aborted.");
            return Ok(());
        }

        let secret = console::prompt_secret()?;
        let captcha_text = console::prompt_captcha_text(&captcha_path)?;

        if let Err(err) = flow.submit(&account_input, secret, &captcha_text).await {
            eprintln!("{err}");
            continue;
        }

        while flow.state().awaits_code() {
            let code = console::read_code()?;
            if let Err(err) = flow.confirm(&code).await {
                eprintln!("{err}");
            }
        }
    }

    if let Some(permissions) = handle.permissions() {
        println!();
        for entry in &permissions.menu {
            println!("  {:<24} {}", entry.name, entry.url);
        }
    }

    Ok(())
}

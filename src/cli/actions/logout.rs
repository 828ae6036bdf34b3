use crate::{
    auth::session::{FileSessionStore, SessionStore},
    cli::globals::GlobalArgs,
};
use anyhow::Result;

/// Handle the logout action
pub fn handle(globals: &GlobalArgs) -> Result<()> {
    let store = FileSessionStore::new(globals.session_file.clone());
    store.clear()?;
    println!("Signed out.");
    Ok(())
}

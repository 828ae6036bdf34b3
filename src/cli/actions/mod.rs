pub mod login;
pub mod logout;

#[derive(Debug, Clone)]
pub enum Action {
    Login {
        account: Option<String>,
        fresh: bool,
        destination: String,
    },
    Logout,
}

// Client options

/// Tunables for an [`crate::client::AuthClient`].
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Keep the access token fresh with a background refresh timer
    pub auto_refresh_token: bool,

    /// Mirror session lifecycle into the persistence adapter
    pub persist_session: bool,

    /// Ceiling on the scheduler wait in seconds, protecting against
    /// degenerate or very long-lived sessions scheduling a wait of days
    pub max_refresh_wait_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            max_refresh_wait_secs: 14_400, // 4 hours
        }
    }
}

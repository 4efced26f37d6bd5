//! State shared by every resource of a configured provider

use crate::api::Client;

/// The configured API client. Cloning is cheap: resources each take their
/// own handle onto the same connection pool.
#[derive(Clone)]
pub struct PacketProviderData {
    pub client: Client,
}

impl PacketProviderData {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

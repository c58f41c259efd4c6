//! Route paths served by the bridge gateway.

use super::BTreeMap;

pub(super) const INDEX_ENDPOINT: &str = "/";
pub(super) const HEALTH_ENDPOINT: &str = "/health";
pub(super) const STATUS_ENDPOINT: &str = "/status";
pub(super) const LOGIN_ENDPOINT: &str = "/login";
pub(super) const CODE_ENDPOINT: &str = "/code";
pub(super) const PASSWORD_ENDPOINT: &str = "/password";
pub(super) const SEND_ENDPOINT: &str = "/send";
pub(super) const GET_ENDPOINT: &str = "/get";
pub(super) const FILES_ENDPOINT: &str = "/files/{name}";

pub(super) fn endpoint_descriptions() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        (HEALTH_ENDPOINT, "Liveness, uptime and buffered event count"),
        (STATUS_ENDPOINT, "Whether the session is authorized and any pending login phone"),
        ("/login?phone=+51...", "Request a login code for the phone"),
        ("/code?code=12345", "Confirm the received login code"),
        ("/password?password=...", "Complete a login that requires the two-factor password"),
        ("/send?chat_id=@user&msg=hola", "Send a text message"),
        (GET_ENDPOINT, "Poll buffered inbound messages, newest first"),
        (FILES_ENDPOINT, "Download a received attachment"),
    ])
}

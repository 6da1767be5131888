//! The front-end: three statements run once at startup.
//!
//! 1. `test_command` with `{args: 5}`; the reply becomes the text of the
//!    `response` surface, a failure goes to diagnostics.
//! 2. `report_time_elapsed`, fire-and-forget.
//! 3. Every `time_elapsed` payload, JSON-serialized, becomes the text of the
//!    `time_elapsed` surface.
//!
//! No ordering is imposed between the two commands.

use tokio::task::JoinHandle;

use crate::client::BridgeClient;
use crate::events::Unsubscribe;
use crate::request::Args;
use crate::surface::Surfaces;

pub const RESPONSE_SURFACE: &str = "response";
pub const TIME_ELAPSED_SURFACE: &str = "time_elapsed";

pub const TEST_COMMAND: &str = "test_command";
pub const REPORT_TIME_ELAPSED: &str = "report_time_elapsed";
pub const TIME_ELAPSED_EVENT: &str = "time_elapsed";

/// What `mount` leaves running.
#[derive(Debug)]
pub struct Mounted {
    /// Finishes once `test_command` has resolved and its continuation ran.
    pub response: JoinHandle<()>,
    /// Cancels the `time_elapsed` subscription.
    pub unsubscribe: Unsubscribe,
}

pub fn mount(client: &BridgeClient, surfaces: &Surfaces) -> Mounted {
    let response_surface = surfaces.get_or_create(RESPONSE_SURFACE);
    let elapsed_surface = surfaces.get_or_create(TIME_ELAPSED_SURFACE);

    let mut args = Args::new();
    args.insert("args".to_string(), serde_json::json!(5));
    let response = client
        .issue(TEST_COMMAND, args)
        .then(move |response| response_surface.set_text(response.display_text()));

    client.issue_detached(REPORT_TIME_ELAPSED);

    let unsubscribe = client.subscribe(TIME_ELAPSED_EVENT, move |payload| {
        elapsed_surface.set_text(payload.to_string());
    });

    tracing::info!("Frontend mounted");
    Mounted {
        response,
        unsubscribe,
    }
}

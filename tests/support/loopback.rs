//! Gate for tests that talk to a local mock HTTP server.
//!
//! Some sandboxed runners refuse to bind even loopback sockets. Tests that
//! need a mock server return early there, unless `BULKFETCH_REQUIRE_SOCKET_TESTS`
//! is set, in which case a missing loopback fails the test.

use std::net::{Ipv4Addr, TcpListener};
use std::panic::Location;

const REQUIRE_ENV: &str = "BULKFETCH_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV).is_ok_and(|value| {
        let value = value.trim();
        value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
    })
}

/// Whether a mock server cannot run here. Reports the calling test's location.
///
/// # Panics
///
/// Panics instead of returning `true` when `BULKFETCH_REQUIRE_SOCKET_TESTS` is set.
#[track_caller]
#[must_use]
pub fn loopback_blocked() -> bool {
    let Err(error) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)) else {
        return false;
    };

    let caller = Location::caller();
    assert!(
        !sockets_required(),
        "{caller}: loopback bind failed ({error}) and {REQUIRE_ENV} is set"
    );
    eprintln!("{caller}: loopback bind failed ({error}); skipping mock-server test");
    true
}

/// Value a skipped test returns in place of running.
pub trait Skipped {
    fn skipped() -> Self;
}

impl Skipped for () {
    fn skipped() -> Self {}
}

impl<E> Skipped for Result<(), E> {
    fn skipped() -> Self {
        Ok(())
    }
}

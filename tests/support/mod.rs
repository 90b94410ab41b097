pub mod loopback;

/// Starts a `wiremock::MockServer`, or returns from the enclosing test when
/// loopback sockets are unavailable.
macro_rules! require_mock_server {
    () => {{
        if $crate::support::loopback::loopback_blocked() {
            return $crate::support::loopback::Skipped::skipped();
        }
        wiremock::MockServer::start().await
    }};
}

/// Liveness probe.
pub async fn healthcheck() -> &'static str {
    "ok"
}

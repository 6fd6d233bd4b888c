use env_flags::env_flags;

env_flags! {
    /// Listen port for the combined HTTP + WebSocket surface.
    pub PORT: u16 = 8787;

    /// Session persistence backend: "memory" (process-only, default) or
    /// "file" (JSON document per session under KV_DATA_DIR).
    pub KV_BACKEND: &str = "memory";
    /// Opaque region/location hint forwarded to the KV adapter.
    pub KV_REGION: Option<&str> = None;
    /// Data directory for the "file" backend.
    pub KV_DATA_DIR: &str = "./classdeck-data";

    pub LM_API_KEY: Option<&str> = None;
    pub LM_MODEL_NAME: &str = "gpt-4o-mini";
    pub LM_API_BASE: &str = "https://api.openai.com/v1";

    /// Allowed browser origin; unset disables CORS headers entirely.
    pub CORS_ORIGIN: Option<&str> = None;

    /// Scratch directory for sandboxed execution. Defaults to a `classdeck`
    /// subdirectory of the system temp dir.
    pub TEMP_DIR: Option<&str> = None;

    /// Endpoints idle longer than this are force-disconnected.
    pub IDLE_TIMEOUT_SEC: u64 = 1800;
    /// Cadence of the per-session summary sweep.
    pub SUMMARY_INTERVAL_SEC: u64 = 30;
    /// How long a disconnected student's record survives.
    pub DISCONNECT_GRACE_SEC: u64 = 300;
}

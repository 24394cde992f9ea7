pub mod core {
    pub mod config;
    pub mod cycle;
    pub mod error;
    pub mod routes;
    pub mod state;
    pub mod tracing_init;
}

pub mod api {
    pub mod client;
    pub mod notifier;
}

pub mod models {
    pub mod action;
    pub mod sample;
    pub mod torrent;
}

pub mod policy {
    pub mod engine;
    pub mod group;
    pub mod health;
    pub mod space;
    pub mod split;
}

pub mod stores {
    pub mod sample_store;
}

pub mod metrics {
    pub mod collector;
}

pub mod handlers {
    pub mod fallback;
    pub mod health;
    pub mod metrics;
}

pub mod utils {
    pub mod auth;
    pub mod bytes;
    pub mod time;
}

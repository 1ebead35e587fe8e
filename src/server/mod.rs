mod handlers;
mod jobs;
mod models;
mod state;

pub use handlers::run_server;

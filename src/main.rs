use adw::prelude::*;
use adw::Application;
use mathnano::api::create_service;
use mathnano::config::{AppConfig, ProviderConfig};
use mathnano::constants::APP_ID;
use mathnano::session::SessionManager;

#[tokio::main]
async fn main() -> glib::ExitCode {
    mathnano::logging::init();

    let config = AppConfig::load();
    let provider = config
        .get_active_provider()
        .cloned()
        .unwrap_or_else(ProviderConfig::ollama_default);
    tracing::info!(
        provider = %provider.name,
        model = %provider.active_model,
        "Using model provider"
    );
    let sessions = SessionManager::new(create_service(&provider));

    let app = Application::builder().application_id(APP_ID).build();
    app.connect_activate(move |app| mathnano::ui::build_panel(app, sessions.clone()));
    app.run()
}

//! GTK front-end. Widgets only project `Controller` state; every action
//! goes back through the controller.

pub mod dialogs;
pub mod panel;

pub use panel::build_panel;

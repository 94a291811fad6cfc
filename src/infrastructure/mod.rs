pub mod launcher;
pub mod logging;
pub mod scripted_host;

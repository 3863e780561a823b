pub mod app;
pub mod audio;
pub mod capability;
pub mod config;
pub mod export;
pub mod images;
pub mod logging;
pub mod params;
pub mod prefs;
pub mod presets;
pub mod render;
pub mod surface;
pub mod terminal;
pub mod visual;

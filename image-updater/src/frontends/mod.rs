mod image_config;

pub use image_config::ImageConfigFrontend;

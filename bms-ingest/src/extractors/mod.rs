//! External oracles
//!
//! - **vision_client** - screenshot → readings extraction service
//! - **weather_client** - optional site weather enrichment

pub mod vision_client;
pub mod weather_client;

pub use vision_client::{detect_mime_type, mime_type_for, HttpVisionClient, VisionClientConfig, VisionError, VisionExtractor};
pub use weather_client::{OpenMeteoClient, SiteLocation, WeatherError, WeatherLookup, WeatherSample};

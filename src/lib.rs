pub mod assets;
pub mod driver;
pub mod encoding;
pub mod error_codes;
pub mod fit;
pub mod logging;
pub mod materials;
#[cfg(feature = "play")]
pub mod play;
pub mod pointer;
pub mod renderer;
pub mod sampler;
pub mod scene;

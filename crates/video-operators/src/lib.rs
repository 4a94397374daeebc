//! Stage operators: typed `StageOperator` implementations wrapping each
//! black-box ML/TTS/mixing collaborator, plus pure post-processing helpers.

pub mod backends;
pub mod background_remover;
pub mod bgm;
pub mod person_detector;
pub mod postprocess;
pub mod tts;

pub use background_remover::{BackgroundRemovalInput, BackgroundRemover};
pub use bgm::{BgmMixInput, BgmMixer};
pub use person_detector::{PersonDetectionInput, PersonDetector};
pub use postprocess::{postprocess, with_area_pct, RawDetection};
pub use tts::TtsSynthesizer;

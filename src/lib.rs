//  _______ _________         _        _______  ______
// (       )\__   __/|\     /|( \      (  ___  )(  ___ \
// | () () |   ) (   ( \   / )| (      | (   ) || (   ) )
// | || || |   | |    \ (_) / | |      | (___) || (__/ /
// | |(_)| |   | |     ) _ (  | |      |  ___  ||  __ (
// | |   | |   | |    / ( ) \ | |      | (   ) || (  \ \
// | )   ( |___) (___( /   \ )| (____/\| )   ( || )___) )
// |/     \|\_______/|/     \|(_______/|/     \||/ \___/

pub mod error;
pub mod config;
pub mod clock;
pub mod buffer;
pub mod waveform;
mod segment;
pub mod bus;
pub mod track;
pub mod analyzer;
pub mod engine;
pub mod utils;

pub use error::{MixError, MixResult};
pub use config::EngineConfig;
pub use clock::{Clock, ManualClock, RenderClock, SystemClock};
pub use buffer::DecodedAudioBuffer;
pub use waveform::WaveformType;
pub use bus::MixBus;
pub use track::{TrackChannel, TrackHandle, TransportState};
pub use analyzer::Analyzer;
pub use engine::{MixEngine, TransportChange, ChangeCause};
pub use utils::{track_name_from_path, format_time};

pub mod crt;
pub mod daily_levels;
pub mod fvg;
pub mod key_candles;
pub mod turtle_soup;

pub use crt::{CrtKind, CrtSignal};
pub use daily_levels::{DailyLevelKind, DailyLevelTouch};
pub use fvg::{Fvg, FvgExitDirection};
pub use key_candles::KeyCandles;
pub use turtle_soup::TurtleSoupSignal;

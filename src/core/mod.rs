pub mod candles;
pub mod news;
pub mod schedule;

//! Strategy: turns a market judgment into a spawn decision and position size.

pub mod judge;

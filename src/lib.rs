//! Life calendar: weeks lived and left against an assumed lifespan, with a
//! daily Telegram summary and a years × weeks chart.

pub mod age;
pub mod app;
pub mod birthdate;
pub mod bot;
pub mod config;
pub mod grid;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod svg;
pub mod telegram;

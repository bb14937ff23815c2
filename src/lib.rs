pub mod catalog;
pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod funnel;
pub mod ids;
pub mod lease;
pub mod ledger;
pub mod meta;
pub mod model;
pub mod naming;
pub mod openai;
pub mod report;
pub mod retry;
pub mod runner;
pub mod stages;
pub mod sync;
pub mod table;

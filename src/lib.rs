// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Haukka - WordPress Plugin/Theme Reconnaissance Engine
 * Scores catalog packages by vulnerability probability, orchestrates scan
 * sessions as resumable observable jobs and drives bulk static analysis
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod analysis;
pub mod broadcast;
pub mod bulk;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod fingerprint;
pub mod runner;
pub mod scoring;
pub mod server;
pub mod store;
pub mod types;

pub use errors::{HunterError, HunterResult};
pub use types::{ScanConfig, ScanSession, ScanStatus};

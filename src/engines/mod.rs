// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod chromium_engine;
pub mod content_guard;
pub mod network_policy;
pub mod stealth;
pub mod traits;

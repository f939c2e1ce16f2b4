// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod level;
pub mod lookup;
pub mod variables;

pub use level::Level;
pub use lookup::{Color, LookupTable};
pub use variables::ProtocolVariables;

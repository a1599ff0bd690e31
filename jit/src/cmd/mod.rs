// Copyright (C) 2024 Ethan Uppal. All rights reserved.

pub mod check;
pub mod raw;
pub mod run;

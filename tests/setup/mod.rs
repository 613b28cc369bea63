// SPDX-License-Identifier: CC0-1.0

#![allow(dead_code)]

pub mod test_util;

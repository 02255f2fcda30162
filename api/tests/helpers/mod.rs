#![allow(dead_code)]

pub mod app;

pub use app::{
    authed_json_request, authed_request, make_test_app, read_json, seed_users, token_for, Seed,
};

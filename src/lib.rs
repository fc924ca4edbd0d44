// Library for tests to access modules

pub mod collector;
pub mod config;
pub mod controller;
pub mod docker_repo;
pub mod models;
pub mod routes;

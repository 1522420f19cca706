pub mod app;
pub mod auth;
pub mod tmdb;
pub mod watchlist;

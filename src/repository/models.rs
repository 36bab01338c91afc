//! Diesel ORM models for the session database.
//!
//! These models provide compile-time type checking for database operations.
//! Timestamps are stored as RFC 3339 text; tab history is a JSON array.

use diesel::prelude::*;

use crate::schema;

/// Session row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub persona_id: String,
    pub created_at: String,
    pub last_accessed: String,
    pub data: String,
}

/// New session for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::sessions)]
pub struct NewSession<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub persona_id: &'a str,
    pub created_at: &'a str,
    pub last_accessed: &'a str,
    pub data: &'a str,
}

/// Tab row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::tabs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TabRecord {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub title: String,
    pub persona_id: String,
    pub created_at: String,
    pub last_accessed: String,
    pub history: String,
    pub scroll_position: i32,
    pub zoom_factor: f64,
}

/// New tab for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::tabs)]
pub struct NewTab<'a> {
    pub id: &'a str,
    pub session_id: &'a str,
    pub url: &'a str,
    pub title: &'a str,
    pub persona_id: &'a str,
    pub created_at: &'a str,
    pub last_accessed: &'a str,
    pub history: &'a str,
    pub scroll_position: i32,
    pub zoom_factor: f64,
}

//! Community feed. Likes are a set per post, toggled by the same call.
use std::{collections::HashMap, sync::Arc};

use axum::{
    Json,
    extract::{Path, State, rejection::{JsonRejection, PathRejection}},
};
use bank::{
    models::{Comment, Post, UserSummary},
    payloads::{LikePost, NewComment, NewPost},
};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    database::{get_enum, get_uuid},
    error::AppError,
    state::AppState,
    users::require_user,
    utils::require_text,
};

pub const FEED_LIMIT: i64 = 100;

fn summary(row: &SqliteRow, prefix: &str) -> Result<UserSummary, sqlx::Error> {
    Ok(UserSummary {
        id: get_uuid(row, &format!("{prefix}_id"))?,
        name: row.try_get(format!("{prefix}_name").as_str())?,
        role: get_enum(row, &format!("{prefix}_role"))?,
    })
}

/// Newest posts first, or the single post `only` when given.
async fn load_posts(
    pool: &SqlitePool,
    only: Option<Uuid>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    let only = only.map(|id| id.to_string());

    let rows = sqlx::query(
        "SELECT p.id, p.content, p.kind, p.media_url, p.created_at,
                u.id AS author_id, u.name AS author_name, u.role AS author_role
         FROM posts p JOIN users u ON u.id = p.author_id
         WHERE (?1 IS NULL OR p.id = ?1)
         ORDER BY p.created_at DESC
         LIMIT ?2",
    )
    .bind(only.as_deref())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let ids: Vec<String> = rows
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<_, _>>()?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");

    let like_sql = format!(
        "SELECT post_id, user_id FROM post_likes WHERE post_id IN ({placeholders}) ORDER BY rowid"
    );
    let mut likes_query = sqlx::query(&like_sql);
    for id in &ids {
        likes_query = likes_query.bind(id.as_str());
    }
    let mut likes: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in likes_query.fetch_all(pool).await? {
        likes
            .entry(get_uuid(&row, "post_id")?)
            .or_default()
            .push(get_uuid(&row, "user_id")?);
    }

    let comment_sql = format!(
        "SELECT c.id, c.post_id, c.text, c.created_at,
                u.id AS commenter_id, u.name AS commenter_name, u.role AS commenter_role
         FROM post_comments c JOIN users u ON u.id = c.user_id
         WHERE c.post_id IN ({placeholders})
         ORDER BY c.created_at, c.rowid"
    );
    let mut comments_query = sqlx::query(&comment_sql);
    for id in &ids {
        comments_query = comments_query.bind(id.as_str());
    }
    let mut comments: HashMap<Uuid, Vec<Comment>> = HashMap::new();
    for row in comments_query.fetch_all(pool).await? {
        comments
            .entry(get_uuid(&row, "post_id")?)
            .or_default()
            .push(Comment {
                id: get_uuid(&row, "id")?,
                user: summary(&row, "commenter")?,
                text: row.try_get("text")?,
                created_at: row.try_get("created_at")?,
            });
    }

    let posts = rows
        .iter()
        .map(|row| {
            let id = get_uuid(row, "id")?;

            Ok(Post {
                id,
                author: summary(row, "author")?,
                content: row.try_get("content")?,
                kind: get_enum(row, "kind")?,
                media_url: row.try_get("media_url")?,
                likes: likes.remove(&id).unwrap_or_default(),
                comments: comments.remove(&id).unwrap_or_default(),
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()?;

    Ok(posts)
}

pub async fn feed(pool: &SqlitePool) -> Result<Vec<Post>, AppError> {
    load_posts(pool, None, FEED_LIMIT).await
}

pub async fn require_post(pool: &SqlitePool, id: Uuid) -> Result<Post, AppError> {
    load_posts(pool, Some(id), 1)
        .await?
        .pop()
        .ok_or(AppError::NotFound("Post"))
}

pub async fn create_post(pool: &SqlitePool, post: &NewPost) -> Result<Post, AppError> {
    let author = require_user(pool, post.author_id).await?;

    let media_url = post
        .media_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string);
    let content = post.content.trim().to_string();

    if content.is_empty() && media_url.is_none() {
        return Err(AppError::bad_request("Post needs content or media"));
    }

    let post = Post {
        id: Uuid::new_v4(),
        author: UserSummary::from(&author),
        content,
        kind: post.kind,
        media_url,
        likes: Vec::new(),
        comments: Vec::new(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO posts (id, author_id, content, kind, media_url, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(post.id.to_string())
    .bind(author.id.to_string())
    .bind(&post.content)
    .bind(post.kind.as_str())
    .bind(&post.media_url)
    .bind(post.created_at)
    .execute(pool)
    .await?;

    Ok(post)
}

/// Adds the like, or removes it when `user_id` already liked the post.
pub async fn toggle_like(pool: &SqlitePool, post_id: Uuid, user_id: Uuid) -> Result<Post, AppError> {
    require_post(pool, post_id).await?;
    require_user(pool, user_id).await?;

    let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = ? AND user_id = ?")
        .bind(post_id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?
        .rows_affected();

    if removed == 0 {
        sqlx::query("INSERT OR IGNORE INTO post_likes (post_id, user_id) VALUES (?, ?)")
            .bind(post_id.to_string())
            .bind(user_id.to_string())
            .execute(pool)
            .await?;
    }

    require_post(pool, post_id).await
}

/// Stores the comment and returns it with the commenter's summary.
pub async fn add_comment(
    pool: &SqlitePool,
    post_id: Uuid,
    comment: &NewComment,
) -> Result<Comment, AppError> {
    require_post(pool, post_id).await?;
    let commenter = require_user(pool, comment.user_id).await?;

    let comment = Comment {
        id: Uuid::new_v4(),
        user: UserSummary::from(&commenter),
        text: require_text(&comment.text, "text")?,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO post_comments (id, post_id, user_id, text, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(comment.id.to_string())
    .bind(post_id.to_string())
    .bind(commenter.id.to_string())
    .bind(&comment.text)
    .bind(comment.created_at)
    .execute(pool)
    .await?;

    Ok(comment)
}

pub async fn feed_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Post>>, AppError> {
    Ok(Json(feed(&state.db).await?))
}

pub async fn create_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewPost>, JsonRejection>,
) -> Result<Json<Post>, AppError> {
    let Json(post) = payload?;

    Ok(Json(create_post(&state.db, &post).await?))
}

pub async fn like_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<LikePost>, JsonRejection>,
) -> Result<Json<Post>, AppError> {
    let Path(id) = path?;
    let Json(like) = payload?;

    Ok(Json(toggle_like(&state.db, id, like.user_id).await?))
}

pub async fn comment_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<NewComment>, JsonRejection>,
) -> Result<Json<Comment>, AppError> {
    let Path(id) = path?;
    let Json(comment) = payload?;

    Ok(Json(add_comment(&state.db, id, &comment).await?))
}

use crate::{
    auth,
    config::Config,
    db::{self, DbPool},
    error::{ChatError, ChatResult},
    messages,
    presence::Presence,
    router::EventRouter,
    summary::{self, Mutation},
    typing::TypingTracker,
    users, ws,
};
use anyhow::Result;
use axum::{
    extract::{Extension, Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use rusqlite::Connection;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use sync_api::{
    CreateContactReq, CreateMessageReq, DeletedMessage, EditMessageReq, Event, MarkReadReq,
    Message, ProfilePatch, ReactionReq, User,
};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub presence: Arc<Presence>,
    pub router: EventRouter,
    pub typing: Arc<TypingTracker>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let pool = db::open_pool(config.db_path())?;
        let presence = Arc::new(Presence::new());
        Ok(Self {
            pool,
            router: EventRouter::new(presence.clone()),
            presence,
            typing: Arc::new(TypingTracker::new(config.typing_debounce)),
            config,
        })
    }

    /// Run a store operation on a pooled connection off the async executor.
    pub async fn with_conn<T, F>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| ChatError::Internal(e.into()))?
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(me))
        .route("/api/user", axum::routing::delete(delete_user))
        .route("/api/online", get(online))
        .route("/api/contact", post(create_contact))
        .route("/api/contacts", get(list_contacts))
        .route("/api/messages/:contact_id", get(list_messages))
        .route("/api/message", post(create_message))
        .route(
            "/api/message/:id",
            patch(edit_message).delete(delete_message),
        )
        .route("/api/reaction", post(react))
        .route("/api/message-read", post(mark_read))
        .route("/api/profile", patch(update_profile))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: axum::http::Request<B>,
    next: Next<B>,
) -> Response {
    let claims = {
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        auth::extract_token(header, req.uri())
            .and_then(|t| auth::verify_jwt(&state.config.jwt_secret.0, &t).ok())
    };
    let Some(claims) = claims else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(sync_api::ErrorBody {
                error: "unauthorized".into(),
            }),
        )
            .into_response();
    };
    let user = match claims.user_id() {
        Ok(id) => {
            let email = claims.email.clone();
            state
                .with_conn(move |conn| users::ensure_user(conn, &id, &email))
                .await
        }
        Err(e) => Err(ChatError::Internal(e)),
    };
    match user {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

async fn me(Extension(me): Extension<User>) -> Json<User> {
    Json(me)
}

async fn online(State(state): State<AppState>) -> Json<Vec<Uuid>> {
    Json(state.presence.online_users())
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
) -> ChatResult<StatusCode> {
    let id = me.id;
    let former = state
        .with_conn(move |conn| users::delete_account(conn, &id))
        .await?;
    let closed = state.presence.disconnect_user(&id);
    for receiver in state.typing.clear_sender(&id) {
        if former.contains(&receiver) {
            state.router.publish(
                &Event::Typing {
                    sender: id,
                    receiver,
                    draft_len: 0,
                },
                &[receiver],
            );
        }
    }
    info!(user = %id, contacts = former.len(), closed, "account removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn create_contact(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<CreateContactReq>,
) -> ChatResult<impl IntoResponse> {
    let id = me.id;
    let contact = state
        .with_conn(move |conn| users::create_contact(conn, &id, &req.email))
        .await?;
    state.router.publish(
        &Event::ContactCreated {
            contact: me.clone(),
        },
        &[contact.id],
    );
    state.router.publish(
        &Event::ContactCreated {
            contact: contact.clone(),
        },
        &[me.id],
    );
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn list_contacts(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
) -> ChatResult<impl IntoResponse> {
    let contacts = state
        .with_conn(move |conn| users::list_contacts(conn, &me.id))
        .await?;
    Ok(Json(contacts))
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(contact_id): Path<Uuid>,
) -> ChatResult<Json<Vec<Message>>> {
    let id = me.id;
    let page = state
        .with_conn(move |conn| {
            users::require_user(conn, &contact_id)?;
            messages::list_conversation(conn, &id, &contact_id)
        })
        .await?;
    if !page.newly_read.is_empty() {
        state.router.publish(
            &Event::MessagesRead {
                reader: me.id,
                ids: page.newly_read.clone(),
            },
            &[contact_id, me.id],
        );
    }
    Ok(Json(page.messages))
}

async fn create_message(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<CreateMessageReq>,
) -> ChatResult<impl IntoResponse> {
    let id = me.id;
    let (submitted, receiver) = state
        .with_conn(move |conn| {
            let submitted = messages::submit_message(
                conn,
                &id,
                &req.receiver,
                req.text.as_deref(),
                req.image.as_deref(),
                req.client_ref.as_deref(),
            )?;
            if !submitted.replayed {
                summary::project(conn, Mutation::Created(&submitted.message))?;
            }
            let receiver = users::require_user(conn, &submitted.message.receiver)?;
            Ok((submitted, receiver))
        })
        .await?;
    let message = submitted.message;
    // a retry gets the stored message back; the first attempt already
    // projected and announced it
    if submitted.replayed {
        return Ok((StatusCode::OK, Json(message)));
    }
    publish_to_pair(&state, [receiver.id, me.id], |viewer| Event::MessageCreated {
        message: message.clone().visible_to(viewer),
        sender: me.clone(),
        receiver: receiver.clone(),
    });
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageReq>,
) -> ChatResult<Json<Message>> {
    let id = me.id;
    let message = state
        .with_conn(move |conn| {
            let message = messages::edit_message(conn, &id, &message_id, &req.text)?;
            summary::project(conn, Mutation::Changed(&message))?;
            Ok(message)
        })
        .await?;
    publish_update(&state, &me, &message);
    Ok(Json(message.visible_to(me.id)))
}

async fn react(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<ReactionReq>,
) -> ChatResult<Json<Message>> {
    let id = me.id;
    let message = state
        .with_conn(move |conn| {
            let message = messages::react_to_message(conn, &id, &req.message_id, &req.reaction)?;
            summary::project(conn, Mutation::Changed(&message))?;
            Ok(message)
        })
        .await?;
    publish_update(&state, &me, &message);
    Ok(Json(message.visible_to(me.id)))
}

/// Publish to both participants of a pair, building the event per viewer so
/// each side only sees what belongs to it.
fn publish_to_pair(state: &AppState, pair: [Uuid; 2], event: impl Fn(Uuid) -> Event) {
    for viewer in pair {
        state.router.publish(&event(viewer), &[viewer]);
    }
}

fn publish_update(state: &AppState, me: &User, message: &Message) {
    publish_to_pair(state, [message.peer_of(me.id), me.id], |viewer| {
        Event::MessageUpdated {
            message: message.clone().visible_to(viewer),
            sender: me.clone(),
        }
    });
}

fn deleted_for(deleted: &DeletedMessage, viewer: Uuid) -> DeletedMessage {
    DeletedMessage {
        message: deleted.message.clone().visible_to(viewer),
        remaining: deleted
            .remaining
            .iter()
            .cloned()
            .map(|m| m.visible_to(viewer))
            .collect(),
    }
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Path(message_id): Path<Uuid>,
) -> ChatResult<impl IntoResponse> {
    let id = me.id;
    let deleted = state
        .with_conn(move |conn| {
            let deleted = messages::delete_message(conn, &id, &message_id)?;
            summary::project(conn, Mutation::Deleted(&deleted.message))?;
            Ok(deleted)
        })
        .await?;
    publish_to_pair(&state, [deleted.message.peer_of(me.id), me.id], |viewer| {
        let seen = deleted_for(&deleted, viewer);
        Event::MessageDeleted {
            message: seen.message,
            sender: me.clone(),
            remaining: seen.remaining,
        }
    });
    Ok(Json(deleted_for(&deleted, me.id)))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(req): Json<MarkReadReq>,
) -> ChatResult<Json<Vec<Message>>> {
    let id = me.id;
    let updated = state
        .with_conn(move |conn| {
            let updated = messages::mark_read(conn, &id, &req.ids)?;
            for message in &updated {
                summary::project(conn, Mutation::Changed(message))?;
            }
            Ok(updated)
        })
        .await?;
    // one event per sender so nobody learns about ids outside their pair
    let mut by_sender: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for message in &updated {
        by_sender.entry(message.sender).or_default().push(message.id);
    }
    for (sender, ids) in by_sender {
        state.router.publish(
            &Event::MessagesRead {
                reader: me.id,
                ids,
            },
            &[sender, me.id],
        );
    }
    Ok(Json(updated.into_iter().map(|m| m.visible_to(me.id)).collect()))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(me): Extension<User>,
    Json(patch): Json<ProfilePatch>,
) -> ChatResult<Json<User>> {
    let user = state
        .with_conn(move |conn| users::update_profile(conn, &me.id, &patch))
        .await?;
    Ok(Json(user))
}

/// Run the HTTP server until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtSecret;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state() -> (AppState, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            bind: "127.0.0.1:0".into(),
            data_dir: tmp.path().to_path_buf(),
            logging_enabled: false,
            jwt_secret: JwtSecret(b"test-secret".to_vec()),
            typing_debounce: Duration::from_millis(100),
        };
        (AppState::new(config).await.unwrap(), tmp)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (state, _tmp) = state().await;
        let resp = build_router(state)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn requires_bearer_token() {
        let (state, _tmp) = state().await;
        let app = build_router(state);
        let resp = app
            .clone()
            .oneshot(Request::get("/api/contacts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = app
            .oneshot(
                Request::get("/api/contacts")
                    .header(header::AUTHORIZATION, "Bearer nonsense")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn first_request_creates_user() {
        let (state, _tmp) = state().await;
        let id = Uuid::new_v4();
        let token = auth::issue_jwt(b"test-secret", &id, "new@x.io", time::Duration::minutes(5))
            .unwrap();
        let resp = build_router(state.clone())
            .oneshot(
                Request::get("/api/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stored = state
            .with_conn(move |conn| users::get_user(conn, &id))
            .await
            .unwrap();
        assert_eq!(stored.unwrap().email, "new@x.io");
    }
}

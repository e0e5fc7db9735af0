//! HTTP API for the reward ledger
//!
//! ## Tokens
//! - `POST /tokens/award` - `{user_id, action_type, context_type?, context_id?, context_name?}`
//! - `POST /tokens/claim-daily` - `{user_id}`
//! - `POST /tokens/redeem` - `{user_id, amount, reason}`
//! - `GET /tokens/balance?user_id=`
//! - `GET /tokens/history?user_id=&limit=`
//! - `GET /tokens/leaderboard?limit=`
//! - `GET /tokens/rewards-config`
//! - `GET /tokens/audit?user_id=`
//!
//! ## Badges
//! - `GET /badges`
//! - `GET /badges/my?user_id=`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -d '{"user_id":"u1","action_type":"signup_bonus"}' \
//!      http://localhost:8095/tokens/award
//! curl -X POST -d '{"user_id":"u1"}' http://localhost:8095/tokens/claim-daily
//! curl 'http://localhost:8095/tokens/balance?user_id=u1'
//! ```
//!
//! Authentication is handled upstream; `user_id` is trusted as given.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::services::{self, AwardRequest, Services};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct RedeemRequest {
    user_id: String,
    amount: i64,
    reason: String,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self { services, bind_addr }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), LedgerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, hyper::Error>(server.handle_request(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let query = req.uri().query().unwrap_or("").to_string();

        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method, path.as_str()) {
            (Method::GET, "/health") => Ok(services::ok(&serde_json::json!({ "status": "ok" }))),

            (Method::POST, "/tokens/award") => self.handle_award(req).await,
            (Method::POST, "/tokens/claim-daily") => self.handle_claim_daily(req).await,
            (Method::POST, "/tokens/redeem") => self.handle_redeem(req).await,
            (Method::GET, "/tokens/balance") => self.handle_balance(&query).await,
            (Method::GET, "/tokens/history") => self.handle_history(&query).await,
            (Method::GET, "/tokens/leaderboard") => self.handle_leaderboard(&query).await,
            (Method::GET, "/tokens/rewards-config") => self.handle_rewards_config().await,
            (Method::GET, "/tokens/audit") => self.handle_audit(&query).await,

            (Method::GET, "/badges") => self.handle_badges().await,
            (Method::GET, "/badges/my") => self.handle_my_badges(&query).await,

            (_, p) if is_known_path(p) => Ok(services::method_not_allowed()),
            _ => Ok(services::not_found("Not Found")),
        };

        result.unwrap_or_else(services::error_response)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    async fn handle_award<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, LedgerError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let body: AwardRequest = read_json(req).await?;
        let outcome = self
            .services
            .ledger
            .award(&body.user_id, &body.action_type, body.context)
            .await?;
        Ok(services::ok(&outcome))
    }

    async fn handle_claim_daily<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, LedgerError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let body: ClaimRequest = read_json(req).await?;
        let outcome = self.services.ledger.claim_daily(&body.user_id).await?;
        Ok(services::ok(&outcome))
    }

    async fn handle_redeem<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, LedgerError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let body: RedeemRequest = read_json(req).await?;
        let redemption = self
            .services
            .ledger
            .redeem(&body.user_id, body.amount, &body.reason)
            .await?;
        Ok(services::created(&redemption))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    async fn handle_balance(&self, query: &str) -> Result<Response<Full<Bytes>>, LedgerError> {
        let q: UserQuery = parse_query(query)?;
        let balance = self.services.ledger.get_balance(&q.user_id).await?;
        Ok(services::ok(&balance))
    }

    async fn handle_history(&self, query: &str) -> Result<Response<Full<Bytes>>, LedgerError> {
        let q: UserQuery = parse_query(query)?;
        let transactions = self.services.ledger.get_history(&q.user_id, q.limit).await?;
        Ok(services::ok(&serde_json::json!({ "transactions": transactions })))
    }

    async fn handle_leaderboard(&self, query: &str) -> Result<Response<Full<Bytes>>, LedgerError> {
        let q: LimitQuery = parse_query(query)?;
        let leaderboard = self.services.ledger.get_leaderboard(q.limit).await?;
        Ok(services::ok(&leaderboard))
    }

    async fn handle_rewards_config(&self) -> Result<Response<Full<Bytes>>, LedgerError> {
        let catalog = self.services.ledger.get_catalog().await?;
        Ok(services::ok(&catalog))
    }

    async fn handle_audit(&self, query: &str) -> Result<Response<Full<Bytes>>, LedgerError> {
        let q: UserQuery = parse_query(query)?;
        let report = self.services.ledger.audit(&q.user_id).await?;
        Ok(services::ok(&report))
    }

    async fn handle_badges(&self) -> Result<Response<Full<Bytes>>, LedgerError> {
        let badges = self.services.ledger.get_badges().await?;
        Ok(services::ok(&serde_json::json!({ "badges": badges })))
    }

    async fn handle_my_badges(&self, query: &str) -> Result<Response<Full<Bytes>>, LedgerError> {
        let q: UserQuery = parse_query(query)?;
        let badges = self.services.ledger.get_user_badges(&q.user_id).await?;
        Ok(services::ok(&serde_json::json!({ "badges": badges })))
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/tokens/award"
            | "/tokens/claim-daily"
            | "/tokens/redeem"
            | "/tokens/balance"
            | "/tokens/history"
            | "/tokens/leaderboard"
            | "/tokens/rewards-config"
            | "/tokens/audit"
            | "/badges"
            | "/badges/my"
    )
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T, LedgerError> {
    serde_urlencoded::from_str(query)
        .map_err(|e| LedgerError::Validation(format!("Invalid query: {}", e)))
}

async fn read_json<T, B>(req: Request<B>) -> Result<T, LedgerError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<BoxError>,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| LedgerError::Validation(format!("Failed to read body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|e| LedgerError::Validation(format!("Invalid JSON body: {}", e)))
}

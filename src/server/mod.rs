//! REST and WebSocket surface over the session controller
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /api/health` | `ab` availability |
//! | `POST /api/validate` | validate a trial configuration |
//! | `GET /api/sessions` | list sessions |
//! | `POST /api/sessions` | create a session |
//! | `GET /api/sessions/:id` | full session |
//! | `DELETE /api/sessions/:id` | delete a session |
//! | `POST /api/sessions/:id/start` | start a trial |
//! | `POST /api/sessions/:id/stop` | stop a trial |
//! | `GET /ws` | subscriber protocol |

mod handlers;
mod ws;

use std::convert::Infallible;
use std::net::SocketAddr;

use ab_bench_core::SessionController;
use anyhow::{Context, Result};
use warp::Filter;

fn with_controller(
    controller: SessionController,
) -> impl Filter<Extract = (SessionController,), Error = Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

/// Every route, with JSON rejection handling
pub fn routes(
    controller: SessionController,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(handlers::health);

    let validate = warp::path!("api" / "validate")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller(controller.clone()))
        .and_then(handlers::validate);

    let list = warp::path!("api" / "sessions")
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(handlers::list_sessions);

    let create = warp::path!("api" / "sessions")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_controller(controller.clone()))
        .and_then(handlers::create_session);

    let get = warp::path!("api" / "sessions" / String)
        .and(warp::get())
        .and(with_controller(controller.clone()))
        .and_then(handlers::get_session);

    let delete = warp::path!("api" / "sessions" / String)
        .and(warp::delete())
        .and(with_controller(controller.clone()))
        .and_then(handlers::delete_session);

    let start = warp::path!("api" / "sessions" / String / "start")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and_then(handlers::start_session);

    let stop = warp::path!("api" / "sessions" / String / "stop")
        .and(warp::post())
        .and(with_controller(controller.clone()))
        .and_then(handlers::stop_session);

    let socket = warp::path!("ws")
        .and(warp::ws())
        .and(with_controller(controller))
        .map(|upgrade: warp::ws::Ws, controller: SessionController| {
            upgrade.on_upgrade(move |socket| ws::handle_socket(socket, controller))
        });

    health
        .or(validate)
        .or(list)
        .or(create)
        .or(get)
        .or(delete)
        .or(start)
        .or(stop)
        .or(socket)
        .recover(handlers::handle_rejection)
        .with(warp::trace::request())
}

/// Serve until Ctrl-C
pub async fn serve(controller: SessionController, bind: SocketAddr) -> Result<()> {
    let janitor = controller.spawn_janitor();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
    };

    let (addr, server) = warp::serve(routes(controller.clone()))
        .try_bind_with_graceful_shutdown(bind, shutdown)
        .with_context(|| format!("Failed to bind {bind}"))?;

    tracing::info!(%addr, "ab-bench listening");
    server.await;

    janitor.abort();
    for session_id in controller.supervisor().running_sessions() {
        controller.supervisor().stop(&session_id);
    }
    Ok(())
}

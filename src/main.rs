use std::{io, sync::Arc};

use actix_cors::Cors;
use actix_web::{http, middleware, web, App, HttpServer};
use dotenv::dotenv;
use tokio::{task::spawn, try_join};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{Config, StoreBackend},
    jwt::{JwtAuth, JwtVerifier},
    memory::MemoryStore,
    mongodb::MongoDatabase,
    realtime::{Limits, Push, WebsocketServer},
    redis::RedisHandler,
    store::Store,
};

mod api;
mod config;
mod error;
mod jwt;
mod memory;
mod models;
mod mongodb;
mod populate;
mod realtime;
mod redis;
mod store;

#[cfg(test)]
mod test_support;

fn io_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().map_err(io_error)?;

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Mongo => Arc::new(
            MongoDatabase::init(&config.mongo_url, &config.mongo_db)
                .await
                .map_err(io_error)?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    let store = web::Data::from(store);

    let jwt = JwtVerifier::new(&config.secret_key);
    let jwt_auth = JwtAuth::new(jwt.clone());

    let (ws_server, ws_handle) = WebsocketServer::new(Limits {
        max_handles_per_user: config.realtime.max_handles_per_user,
        max_rooms_per_connection: config.realtime.max_rooms_per_connection,
    });

    let (push, redis_fut) = match &config.redis_url {
        Some(url) => {
            let (redis_handler, redis_handle) =
                RedisHandler::new(url, config.redis_channel.clone(), ws_handle.clone())
                    .map_err(io_error)?;

            (
                Arc::new(redis_handle) as Arc<dyn Push>,
                Some(spawn(redis_handler.run())),
            )
        }
        None => {
            tracing::info!("REDIS_URL not set, pushes stay on this node");
            (Arc::new(ws_handle.clone()) as Arc<dyn Push>, None)
        }
    };
    let push = web::Data::from(push);

    let ws_fut = spawn(ws_server.run());

    let ws_handle = web::Data::new(ws_handle);
    let jwt = web::Data::new(jwt);
    let realtime = web::Data::new(config.realtime);
    let cors_origin = config.cors_origin.clone();

    let addr = format!("{}:{}", config.host, config.port);

    let http_fut = HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default().allowed_origin(origin),
            None => Cors::default().allow_any_origin().send_wildcard(),
        }
        .allowed_methods(["POST", "GET", "PATCH", "PUT", "DELETE"])
        .allowed_headers([
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
            http::header::CONTENT_TYPE,
        ])
        .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .app_data(store.clone())
            .app_data(push.clone())
            .app_data(ws_handle.clone())
            .app_data(jwt.clone())
            .app_data(realtime.clone())
            .configure(api::config_wrapper(&jwt_auth))
            .configure(api::config)
    })
    .bind(&addr)?
    .run();

    tracing::info!("binding on {addr}");

    try_join!(
        http_fut,
        async move { ws_fut.await.map_err(io_error) },
        async move {
            match redis_fut {
                Some(redis_fut) => redis_fut
                    .await
                    .map_err(io_error)
                    .and_then(|res| res.map_err(io_error)),
                None => Ok(()),
            }
        }
    )?;

    Ok(())
}

//! 非营利组织资料中心服务入口

use nonprofit_hub::{
    auth::JwtService,
    config::{AppConfig, StorageBackend},
    db,
    handlers::health,
    middleware::AppState,
    repository::{KeyValueStore, MemoryStore, PgStore},
    routes,
    services::{session::SESSION_REAP_INTERVAL, SessionRegistry},
    telemetry,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("nonprofit-hub {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    if let Ok(env) = std::env::var("NPH_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    // 设置应用启动时间
    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;
    let config = Arc::new(config);

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Nonprofit hub starting...");

    // 3. 存储后端
    let (store, db_pool): (Arc<dyn KeyValueStore>, Option<sqlx::PgPool>) =
        match config.storage.backend {
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                (Arc::new(MemoryStore::new()), None)
            }
            StorageBackend::Postgres => {
                let pool = db::create_pool(&config.database).await?;
                db::run_migrations(&pool).await?;
                tracing::info!("Database initialized");
                (Arc::new(PgStore::new(pool.clone())), Some(pool))
            }
        };

    // 4. 构建应用状态
    let jwt_service = Arc::new(JwtService::from_config(&config.security)?);
    let sessions = Arc::new(SessionRegistry::new(store.clone(), config.clone()));
    let reaper = sessions.spawn_reaper(SESSION_REAP_INTERVAL);

    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        db: db_pool,
        sessions: sessions.clone(),
        jwt_service,
    });

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 关闭前把所有会话的审计队列刷盘
    reaper.abort();
    let timeout = std::time::Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(timeout, sessions.close_all()).await.is_err() {
        tracing::warn!("Graceful shutdown timeout reached, some audit entries may be lost");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("nonprofit-hub {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: nonprofit-hub [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 NPH_ 前缀的环境变量完成，层级用 __ 分隔");
    println!("  例如 NPH_STORAGE__BACKEND=postgres NPH_DATABASE__URL=postgres://...");
}

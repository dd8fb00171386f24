use std::time::Duration;

use log::{error, info, warn};
use marketplace_client::app::AppState;
use marketplace_client::storage::LocalStore;
use marketplace_client::{Session, StoreUpdate};
use tokio::sync::broadcast::error::RecvError;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

async fn open_session(state: AppState, local: LocalStore) -> marketplace_client::Result<Option<Session>> {
    if let Some(session) = Session::restore(state.clone(), local.clone()).await? {
        return Ok(Some(session));
    }
    match (std::env::var("MARKETPLACE_EMAIL"), std::env::var("MARKETPLACE_PASSWORD")) {
        (Ok(email), Ok(password)) => Session::login(state, local, &email, &password).await.map(Some),
        _ => Ok(None),
    }
}

fn spawn_update_logger(session: &Session) {
    let mut rx = session.store().subscribe();
    let store = session.store().clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(StoreUpdate::ChatsReplaced) => {
                    let s = store.read().await;
                    info!("Chat list: {} chats, {} unread", s.chats().len(), s.total_unread());
                }
                Ok(StoreUpdate::ChatInserted { chat_id }) | Ok(StoreUpdate::ChatUpdated { chat_id, .. }) => {
                    let s = store.read().await;
                    if let Some(chat) = s.chat(&chat_id) {
                        info!(
                            "{} [{} unread]: {}",
                            chat.display_name(),
                            chat.unread_count,
                            chat.last_message.as_deref().unwrap_or("")
                        );
                    }
                }
                Ok(StoreUpdate::BudgetBoardChanged { service_id }) => {
                    let state = store.read().await.board().quote_state(&service_id);
                    info!("Service {service_id}: {state:?}");
                }
                Err(RecvError::Lagged(n)) => warn!("Update logger skipped {n} updates"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let state = AppState::load();
    let local = match LocalStore::open_default() {
        Ok(local) => local,
        Err(e) => {
            error!("Cannot open local storage: {e}");
            std::process::exit(1);
        }
    };

    let session = match open_session(state, local).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            error!("No stored session; set MARKETPLACE_EMAIL and MARKETPLACE_PASSWORD to log in");
            std::process::exit(2);
        }
        Err(e) => {
            error!("Login failed: {e}");
            std::process::exit(1);
        }
    };

    spawn_update_logger(&session);
    if let Err(e) = session.load_chats().await {
        error!("Could not load chats: {e}");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };
    let session = &session;
    run_until_shutdown(
        move || async move {
            match session.run_realtime().await {
                Ok(()) => warn!("Realtime channel ended; reconnecting"),
                Err(e) => error!("Realtime channel failed: {e}"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
            // events missed while disconnected are only recoverable by refetching
            session.reload_chats().await;
        },
        shutdown,
    )
    .await;
    info!("Shutting down");
}

/// Repeat `cycle` until `shutdown` resolves, cancelling whichever pass is running.
async fn run_until_shutdown<F, Fut, S>(mut cycle: F, shutdown: S)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
    S: Future,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = cycle() => {}
            _ = &mut shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn shutdown_interrupts_a_pass_in_its_reconnect_wait() {
        let passes = AtomicUsize::new(0);
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let (counter, tx) = (&passes, &tx);
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            run_until_shutdown(
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                        if let Some(tx) = tx.lock().unwrap().take() {
                            tx.send(()).unwrap();
                        }
                        // stands in for the reconnect sleep and reload
                        std::future::pending::<()>().await;
                    }
                },
                rx,
            ),
        )
        .await;
        assert!(finished.is_ok());
        assert_eq!(passes.load(Ordering::SeqCst), 2);
    }
}

use std::sync::Arc;

use crate::{config::Config, dispatch::Dispatcher, store::RedbStore, vapid::VapidKeyPair};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RedbStore>,
    pub cfg: Arc<Config>,
    pub vapid: Arc<VapidKeyPair>,
    pub dispatcher: Dispatcher,
}

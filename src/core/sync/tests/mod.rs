mod reconciler;

use std::sync::Arc;

use crate::core::config::Credentials;
use crate::core::remote::fake::FakeRunSource;
use crate::core::store::MirrorStore;
use crate::core::store::fixtures::at;
use crate::core::sync::Reconciler;

pub(super) fn credentials() -> Credentials {
    Credentials {
        netlify_token: Some("nf-token".to_string()),
        github_token: None,
    }
}

pub(super) async fn enabled_site(store: &MirrorStore, id: &str, name: &str) {
    store.upsert_site(id, name, at(0)).await.unwrap();
    store.set_site_sync_enabled(id, true).await.unwrap();
}

pub(super) fn reconciler(store: &MirrorStore) -> (Reconciler, Arc<FakeRunSource>) {
    let source = Arc::new(FakeRunSource::new());
    (Reconciler::new(store.clone(), source.clone()), source)
}

//! Profile edits for the signed-in user.

use tracing::info;

use duet_shared::{paths, CurrentUser, Result, SessionError, StoreError, WriteOp};
use duet_store::{BlobStore, DocumentStore, FieldDelta};

use crate::attachment::LocalFile;

fn profile_write(e: StoreError) -> SessionError {
    SessionError::write(WriteOp::Profile, e)
}

/// Rename `user`. The lowercase copy is kept for case-insensitive search.
pub async fn update_display_name(
    documents: &dyn DocumentStore,
    user: &CurrentUser,
    name: &str,
) -> Result<CurrentUser> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SessionError::InvalidProfile("name cannot be empty".to_string()));
    }

    let delta = FieldDelta::new()
        .set("displayName", name)
        .set("displayName_lowercase", name.to_lowercase());
    documents
        .update(&paths::user(&user.id), delta)
        .await
        .map_err(profile_write)?;

    info!(user = %user.id.short(), "Display name updated");
    Ok(CurrentUser {
        display_name: name.to_string(),
        ..user.clone()
    })
}

/// Upload `file` as the avatar of `user` and point the profile at it.
pub async fn update_avatar(
    documents: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    user: &CurrentUser,
    file: &LocalFile,
) -> Result<CurrentUser> {
    if file.data.is_empty() {
        return Err(SessionError::InvalidProfile("avatar file is empty".to_string()));
    }

    let handle = blobs
        .put(&paths::profile_image(&user.id), file.data.clone())
        .await
        .map_err(profile_write)?;
    let url = blobs.resolve_url(&handle).await.map_err(profile_write)?;

    documents
        .update(&paths::user(&user.id), FieldDelta::new().set("photoURL", url.as_str()))
        .await
        .map_err(profile_write)?;

    info!(user = %user.id.short(), size = handle.size, "Avatar updated");
    Ok(CurrentUser {
        photo_url: Some(url),
        ..user.clone()
    })
}

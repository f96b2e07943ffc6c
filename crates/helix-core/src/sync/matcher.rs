//! Three-way matching.
//!
//! Joins the encrypted enumeration, the decrypted enumeration, and the
//! sync log into one reconciliation record per logical entry. Purely
//! in-memory: no blob content is read here (headers are fetched later,
//! and only for records that may need them).

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::crypto::keys::MasterKey;
use crate::fs::entry::EntryKind;
use crate::fs::name::encode_name;
use crate::fs::tree::{EntryScope, FsTree};
use crate::pair::{HEADER_FILE_NAME, META_DIR_NAME};

use super::item::PreSync;
use super::log::SyncLog;
use super::SyncError;

/// Assemble one record per logical entry from the three sources.
///
/// Records are seeded from the log (most recent entry per name), joined
/// case-sensitively against the decrypted enumeration, given their
/// deterministic encoded names, and finally joined against the encrypted
/// enumeration. Unmatched blobs come out with only their encrypted name;
/// their decrypted identity is unknown until header decryption.
pub(crate) fn assemble(
    decr: &mut FsTree,
    encr: &mut FsTree,
    log: &SyncLog,
    master_key: &MasterKey,
) -> Result<Vec<PreSync>, SyncError> {
    let encr_entries: Vec<_> = encr
        .get_entries(EntryScope::TopOnly)?
        .into_iter()
        .filter(|entry| {
            let name = entry.path.as_str();
            if name.starts_with('.') {
                // Reserved or scratch names; encoded blob names are pure
                // Base64URL and can never start with a dot.
                if name != HEADER_FILE_NAME {
                    debug!(%name, "skipping dotfile on the encrypted side");
                }
                false
            } else if entry.kind() != EntryKind::File {
                warn!(name = %entry.path, "ignoring non-blob entry on the encrypted side");
                false
            } else {
                true
            }
        })
        .collect();

    let decr_entries: Vec<_> = decr
        .get_entries(EntryScope::All)?
        .into_iter()
        .filter(|entry| !entry.path.starts_with_component(META_DIR_NAME))
        .collect();

    let mut items: Vec<PreSync> = Vec::new();
    let mut by_decr_name: HashMap<String, usize> = HashMap::new();

    for log_entry in log.latest_entries() {
        let mut item = PreSync::empty();
        item.decr_name = Some(log_entry.decr_name.clone());
        item.encr_name = Some(log_entry.encr_name.clone());
        item.log_entry = Some(log_entry.clone());
        by_decr_name.insert(log_entry.decr_name.as_str().to_string(), items.len());
        items.push(item);
    }

    // Decrypted-side join, exact names: a case-only rename must come out
    // as two records (remove old, add new), not one.
    for entry in decr_entries {
        match by_decr_name.get(entry.path.as_str()) {
            Some(&i) => items[i].decr_info = Some(entry),
            None => {
                let mut item = PreSync::empty();
                item.decr_info = Some(entry);
                items.push(item);
            }
        }
    }

    // Name the records discovered on the decrypted side.
    for item in &mut items {
        if item.decr_name.is_none() {
            if let Some(info) = &item.decr_info {
                let name = info.path.clone();
                item.encr_name = Some(encode_name(&name, master_key)?);
                item.decr_name = Some(name);
            }
        }
    }

    // Encrypted-side join.
    let by_encr_name: HashMap<String, usize> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| item.encr_name.clone().map(|n| (n, i)))
        .collect();
    for entry in encr_entries {
        let blob_name = entry.path.as_str().to_string();
        match by_encr_name.get(&blob_name) {
            Some(&i) => items[i].encr_info = Some(entry),
            None => {
                let mut item = PreSync::empty();
                item.encr_name = Some(blob_name);
                item.encr_info = Some(entry);
                items.push(item);
            }
        }
    }

    debug!(records = items.len(), "matched three-way state");
    Ok(items)
}

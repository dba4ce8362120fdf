//! `FlagStore` on redb.

use crate::error::db_err;
use crate::schema::FLAGS;
use crate::store::RedbStore;
use async_trait::async_trait;
use notary_authority::{FlagRecord, FlagStore, GateError, GateResult};
use redb::ReadableTable;

#[async_trait]
impl FlagStore for RedbStore {
    async fn get_flag(&self, flag_name: &str) -> GateResult<Option<bool>> {
        let name = flag_name.to_string();
        self.read_txn(move |txn| {
            let table = txn.open_table(FLAGS).map_err(db_err)?;
            let value = table.get(name.as_str()).map_err(db_err)?.map(|g| g.value());
            Ok::<_, GateError>(value)
        })
        .await
    }

    async fn set_flag(&self, flag_name: &str, enabled: bool) -> GateResult<()> {
        let name = flag_name.to_string();
        self.write_txn(move |txn| {
            let mut table = txn.open_table(FLAGS).map_err(db_err)?;
            table.insert(name.as_str(), enabled).map_err(db_err)?;
            Ok::<_, GateError>(())
        })
        .await
    }

    async fn list_flags(&self) -> GateResult<Vec<FlagRecord>> {
        self.read_txn(|txn| {
            let table = txn.open_table(FLAGS).map_err(db_err)?;
            let mut out = Vec::new();
            for item in table.iter().map_err(db_err)? {
                let (k, v) = item.map_err(db_err)?;
                out.push(FlagRecord {
                    flag_name: k.value().to_string(),
                    enabled: v.value(),
                });
            }
            Ok::<_, GateError>(out)
        })
        .await
    }
}

use crate::error::{Error, ErrorKind};
use crate::store::{Marker, MarkerState};
use exn::ResultExt;
use time::UtcDateTime;

#[derive(sqlx::FromRow)]
pub(crate) struct MarkerRow {
    key: String,
    directory: String,
    fingerprint: String,
    state: String,
    marked_at: i64,
}
impl TryFrom<MarkerRow> for Marker {
    type Error = Error;
    fn try_from(row: MarkerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.key,
            directory: row.directory,
            fingerprint: row.fingerprint,
            state: row.state.parse::<MarkerState>()?,
            marked_at: UtcDateTime::from_unix_timestamp(row.marked_at)
                .or_raise(|| ErrorKind::InvalidData("marked_at"))?,
        })
    }
}

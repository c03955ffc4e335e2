//! Loading store contents into memory for validation and snapshots.

use ladder_core::{
  inconsistency::Collection,
  store::{CollectionData, LeagueStore, MatchQuery, StandingQuery},
  validate::Dataset,
};

use crate::{Error, Result};

/// Everything the validator needs, read through the store trait.
pub async fn load_dataset<S: LeagueStore>(store: &S) -> Result<Dataset> {
  let data = load_collections(store, &Collection::ALL).await?;
  Ok(Dataset {
    leagues:      data.leagues,
    seasons:      data.seasons,
    participants: data.participants,
    matches:      data.matches,
    standings:    data.standings,
  })
}

/// The named collections in full; the others stay empty.
pub async fn load_collections<S: LeagueStore>(
  store: &S,
  scope: &[Collection],
) -> Result<CollectionData> {
  let mut data = CollectionData::default();
  for collection in scope {
    match collection {
      Collection::Leagues => {
        data.leagues = store.list_leagues().await.map_err(Error::store)?
      }
      Collection::Seasons => {
        data.seasons = store.list_seasons(None).await.map_err(Error::store)?
      }
      Collection::Participants => {
        data.participants = store.list_participants().await.map_err(Error::store)?
      }
      Collection::Matches => {
        data.matches = store
          .find_matches(&MatchQuery::default())
          .await
          .map_err(Error::store)?
      }
      Collection::Standings => {
        data.standings = store
          .find_standings(&StandingQuery::default())
          .await
          .map_err(Error::store)?
      }
    }
  }
  Ok(data)
}

/// Estimated row count of `scope`, used to size timeouts.
pub async fn estimate_rows<S: LeagueStore>(
  store: &S,
  scope: &[Collection],
) -> Result<u64> {
  let mut total = 0;
  for collection in scope {
    total += store.count(*collection).await.map_err(Error::store)?;
  }
  Ok(total)
}

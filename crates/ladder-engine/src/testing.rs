//! Shared fixtures for the engine's tests.

use std::sync::{Arc, Mutex};

use ladder_core::{
  fixture::{Match, NewMatch},
  league::{
    League, NewLeague, NewParticipant, NewSeason, Participant, ParticipantRef, Season,
  },
  standing::{NewStanding, Standing, Totals},
  store::LeagueStore,
};
use ladder_store_sqlite::SqliteStore;

use crate::notify::{Alert, Notifier};

/// One league, one season and `n` enrolled clubs. Club `i` carries the
/// legacy team id `100 + i`.
pub struct Fixture {
  pub store:  Arc<SqliteStore>,
  pub league: League,
  pub season: Season,
  pub clubs:  Vec<Participant>,
}

pub async fn fixture(n: usize) -> Fixture {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let league = store
    .create_league(NewLeague { slug: "premier".into(), name: "Premier".into() })
    .await
    .unwrap();

  let mut clubs = Vec::with_capacity(n);
  for i in 0..n {
    let club = store
      .create_participant(
        NewParticipant::new(format!("club-{i:02}"), format!("Club {i:02}"))
          .with_legacy_team(legacy_team(i)),
      )
      .await
      .unwrap();
    clubs.push(club);
  }

  let season = store
    .create_season(NewSeason {
      slug:      "premier-2025".into(),
      league_id: league.id,
      name:      "2025".into(),
      roster:    clubs.iter().map(|c| c.id).collect(),
    })
    .await
    .unwrap();

  Fixture { store, league, season, clubs }
}

pub fn legacy_team(i: usize) -> i64 { 100 + i as i64 }

impl Fixture {
  pub fn club_ref(&self, i: usize) -> ParticipantRef {
    ParticipantRef::club(self.clubs[i].id)
  }

  pub fn team_ref(&self, i: usize) -> ParticipantRef {
    ParticipantRef::team(legacy_team(i))
  }

  /// A finished match between clubs `home` and `away`, by club reference.
  pub async fn play(&self, home: usize, away: usize, h: i64, a: i64) -> Match {
    self.insert_match(self.club_ref(home), self.club_ref(away), h, a).await
  }

  /// A finished match recorded under the legacy team scheme.
  pub async fn play_legacy(&self, home: usize, away: usize, h: i64, a: i64) -> Match {
    self.insert_match(self.team_ref(home), self.team_ref(away), h, a).await
  }

  pub async fn insert_match(
    &self,
    home: ParticipantRef,
    away: ParticipantRef,
    h: i64,
    a: i64,
  ) -> Match {
    self
      .store
      .create_match(
        NewMatch::scheduled(self.league.id, self.season.id, 1, home, away).finished(h, a),
      )
      .await
      .unwrap()
  }

  pub async fn standing(
    &self,
    participant: ParticipantRef,
    totals: Totals,
    rank: i64,
  ) -> Standing {
    self
      .store
      .create_standing(
        NewStanding::empty(participant, self.league.id, self.season.id)
          .with_totals(totals)
          .with_rank(rank),
      )
      .await
      .unwrap()
  }
}

/// Keeps every alert for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
  alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
  pub fn alerts(&self) -> Vec<Alert> { self.alerts.lock().unwrap().clone() }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, alert: &Alert) { self.alerts.lock().unwrap().push(alert.clone()); }
}

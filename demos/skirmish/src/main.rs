use std::collections::BTreeMap;
use std::sync::Arc;

use broadside::prelude::*;
use serde_json::{Value, json};

const BOARD: i32 = 8;
const FIRE: usize = 0;
const SCAN: usize = 1;

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

struct Ship {
    id: ShipId,
    team: TeamId,
    kind: &'static str,
    position: Option<Position>,
    sunk: bool,
    /// Seen by the opposing fleet.
    spotted: bool,
}

impl Ship {
    fn info(&self) -> ShipInfo {
        ShipInfo {
            id: self.id,
            team: self.team.clone(),
            kind: self.kind.to_string(),
            position: self.position,
            attributes: BTreeMap::from([("sunk".to_string(), json!(self.sunk))]),
        }
    }

    fn at(&self, cell: Coordinate) -> bool {
        self.position.is_some_and(|p| p.x == cell.x && p.y == cell.y)
    }
}

// ---------------------------------------------------------------------------
// Game logic
// ---------------------------------------------------------------------------

/// Two fleets of three single-cell ships on an 8×8 board. Each turn a
/// fleet may fire once; a hit sinks and reveals the ship.
struct Skirmish {
    ships: Vec<Ship>,
    rosters: BTreeMap<TeamId, Vec<Identity>>,
    turn_order: Vec<TeamId>,
    current: Option<usize>,
    turn: u32,
    fired: bool,
}

fn north() -> TeamId {
    TeamId::new("north")
}

fn south() -> TeamId {
    TeamId::new("south")
}

impl Skirmish {
    fn new() -> Self {
        let mut ships = Vec::new();
        for (offset, team) in [(0, north()), (10, south())] {
            for (i, kind) in ["frigate", "sloop", "cutter"].into_iter().enumerate() {
                ships.push(Ship {
                    id: ShipId(offset + i as u32 + 1),
                    team: team.clone(),
                    kind,
                    position: None,
                    sunk: false,
                    spotted: false,
                });
            }
        }
        Self {
            ships,
            rosters: BTreeMap::new(),
            turn_order: Vec::new(),
            current: None,
            turn: 0,
            fired: false,
        }
    }

    fn ship(&self, id: ShipId) -> Option<&Ship> {
        self.ships.iter().find(|s| s.id == id)
    }

    fn afloat(&self, team: &TeamId) -> usize {
        self.ships
            .iter()
            .filter(|s| &s.team == team && !s.sunk)
            .count()
    }

    fn advance(&mut self) -> Events {
        let Some(current) = self.current else {
            return Vec::new();
        };
        let next = (current + 1) % self.turn_order.len();
        self.current = Some(next);
        self.turn += 1;
        self.fired = false;
        vec![(
            Recipient::All,
            ServerEvent::TurnStart {
                team: self.turn_order[next].clone(),
                turn: self.turn,
            },
        )]
    }

    fn fire(&mut self, team: &TeamId, target: Coordinate) -> Result<AbilityOutcome, String> {
        if self.fired {
            return Err("already fired this turn".into());
        }
        self.fired = true;

        let Some(hit) = self
            .ships
            .iter_mut()
            .find(|s| &s.team != team && !s.sunk && s.at(target))
        else {
            return Ok(AbilityOutcome {
                events: vec![(
                    Recipient::All,
                    ServerEvent::AttributeUpdate {
                        team: Some(team.clone()),
                        ship: None,
                        attributes: BTreeMap::from([(
                            "miss".to_string(),
                            json!({ "x": target.x, "y": target.y }),
                        )]),
                    },
                )],
                winner: None,
            });
        };
        hit.sunk = true;
        hit.spotted = true;
        let (id, enemy, info) = (hit.id, hit.team.clone(), hit.info());

        let mut events = vec![
            (Recipient::Team(team.clone()), ServerEvent::ShipAppear { ship: info }),
            (
                Recipient::All,
                ServerEvent::AttributeUpdate {
                    team: Some(enemy.clone()),
                    ship: Some(id),
                    attributes: BTreeMap::from([("sunk".to_string(), json!(true))]),
                },
            ),
        ];
        let winner = (self.afloat(&enemy) == 0).then(|| team.clone());
        if winner.is_none() {
            events.extend(self.advance());
        }
        Ok(AbilityOutcome { events, winner })
    }

    fn scan(&mut self, team: &TeamId, target: Coordinate) -> Events {
        let mut events = Vec::new();
        for ship in &mut self.ships {
            let Some(p) = ship.position else { continue };
            let near = (p.x - target.x).abs() <= 1 && (p.y - target.y).abs() <= 1;
            if &ship.team != team && near && !ship.spotted {
                ship.spotted = true;
                events.push((
                    Recipient::Team(team.clone()),
                    ServerEvent::ShipAppear { ship: ship.info() },
                ));
            }
        }
        events
    }
}

impl Scenario for Skirmish {
    fn descriptor(&self) -> ScenarioDescriptor {
        ScenarioDescriptor {
            name: "skirmish".into(),
            description: "Three ships a side. Sink the enemy fleet.".into(),
            board_width: BOARD as u32,
            board_height: BOARD as u32,
        }
    }

    fn teams(&self) -> Vec<TeamInfo> {
        vec![
            TeamInfo {
                id: north(),
                name: "Northern Fleet".into(),
                max_players: 2,
            },
            TeamInfo {
                id: south(),
                name: "Southern Fleet".into(),
                max_players: 2,
            },
        ]
    }

    fn finalize_teams(&mut self, rosters: BTreeMap<TeamId, Vec<Identity>>) {
        self.rosters = rosters;
    }

    fn compute_turn_order(&mut self) -> Vec<TeamId> {
        self.turn_order = self.rosters.keys().cloned().collect();
        self.turn_order.clone()
    }

    fn turn_order(&self) -> Vec<TeamId> {
        self.turn_order.clone()
    }

    fn current_team(&self) -> Option<TeamId> {
        self.current.map(|i| self.turn_order[i].clone())
    }

    fn setup_shared(&self) -> SetupShared {
        SetupShared {
            board: json!({ "width": BOARD, "height": BOARD }),
            team_attributes: self
                .turn_order
                .iter()
                .map(|t| (t.clone(), json!({ "afloat": self.afloat(t) })))
                .collect(),
            turn_order: self.turn_order.clone(),
        }
    }

    fn ships(&self) -> Vec<ShipInfo> {
        self.ships.iter().map(Ship::info).collect()
    }

    fn discovered_ships(&self, team: &TeamId) -> Vec<ShipInfo> {
        self.ships
            .iter()
            .filter(|s| &s.team != team && s.spotted)
            .map(Ship::info)
            .collect()
    }

    fn place_ships(
        &mut self,
        team: &TeamId,
        placements: &[ShipPlacement],
    ) -> Result<Events, String> {
        let own = self.ships.iter().filter(|s| &s.team == team).count();
        if placements.len() != own {
            return Err(format!("expected {own} placements, got {}", placements.len()));
        }
        for (i, placement) in placements.iter().enumerate() {
            let ship = self
                .ship(placement.ship)
                .filter(|s| &s.team == team)
                .ok_or_else(|| format!("{} is not a {team} ship", placement.ship))?;
            let Position { x, y, .. } = placement.position;
            if !(0..BOARD).contains(&x) || !(0..BOARD).contains(&y) {
                return Err(format!("{} placed off the board", ship.id));
            }
            let clash = placements[..i].iter().any(|other| {
                other.ship == placement.ship
                    || (other.position.x == x && other.position.y == y)
            });
            if clash {
                return Err(format!("{} overlaps another placement", ship.id));
            }
        }

        for placement in placements {
            if let Some(ship) = self.ships.iter_mut().find(|s| s.id == placement.ship) {
                ship.position = Some(placement.position);
            }
        }
        Ok(vec![(
            Recipient::Team(team.clone()),
            ServerEvent::AttributeUpdate {
                team: Some(team.clone()),
                ship: None,
                attributes: BTreeMap::from([("placed".to_string(), json!(true))]),
            },
        )])
    }

    fn start_game(&mut self) -> Events {
        self.current = Some(0);
        self.turn = 1;
        vec![(
            Recipient::All,
            ServerEvent::TurnStart {
                team: self.turn_order[0].clone(),
                turn: 1,
            },
        )]
    }

    fn end_turn(&mut self, _team: &TeamId) -> Events {
        self.advance()
    }

    fn use_ability(
        &mut self,
        team: &TeamId,
        ship: ShipId,
        ability: usize,
        target: Option<Coordinate>,
    ) -> Result<AbilityOutcome, String> {
        let own = self
            .ship(ship)
            .filter(|s| &s.team == team)
            .ok_or_else(|| format!("{ship} is not a {team} ship"))?;
        if own.sunk {
            return Err(format!("{ship} is sunk"));
        }
        let target = target.ok_or("ability needs a target")?;
        match ability {
            FIRE => self.fire(team, target),
            SCAN => Ok(AbilityOutcome {
                events: self.scan(team, target),
                winner: None,
            }),
            other => Err(format!("{ship} has no ability {other}")),
        }
    }

    fn player_inactive(&mut self, identity: &Identity, team: Option<&TeamId>) -> Events {
        let Some(team) = team else {
            return Vec::new();
        };
        let emptied = self.rosters.get_mut(team).is_some_and(|members| {
            members.retain(|m| m != identity);
            members.is_empty()
        });
        if emptied && self.current_team().as_ref() == Some(team) {
            self.advance()
        } else {
            Vec::new()
        }
    }

    fn export(&self) -> Value {
        json!({
            "turn": self.turn,
            "ships": self.ships(),
        })
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

/// Accepts `dev-<name>` tokens.
struct DevTokenAuth;

impl Authenticator for DevTokenAuth {
    async fn verify(&self, token: &str) -> Result<Principal, ClientError> {
        token
            .strip_prefix("dev-")
            .filter(|name| !name.is_empty())
            .map(Principal::new)
            .ok_or_else(|| ClientError::AuthFailed("token must look like dev-<name>".into()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("BROADSIDE_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let max_sessions = match std::env::var("BROADSIDE_MAX_SESSIONS") {
        Ok(raw) => raw.parse()?,
        Err(_) => RegistryConfig::default().max_sessions,
    };

    let server = BroadsideServerBuilder::new()
        .bind(&addr)
        .max_sessions(max_sessions)
        .store(Arc::new(MemoryStore::new()))
        .build(DevTokenAuth)
        .await?;

    let session = server.create_session(Skirmish::new(), "skirmish-1").await?;
    tracing::info!(
        code = %session.code(),
        "join with ws://{addr}/play/{} and Authorization: Bearer dev-<name>",
        session.code()
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

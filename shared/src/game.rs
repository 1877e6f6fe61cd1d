//! Replicable types of the rhythm game session
//!
//! Each band member is a [`Player`] holding a reference to the [`Guitar`]
//! they play. Players emit `NoteHit`/`NoteMissed` messages as they play;
//! every peer counts them locally as they are delivered.

use crate::changes::Message;
use crate::error::ReplicationError;
use crate::object::Object;
use crate::registry::{Replicated, TypeRegistry};
use crate::value::{Field, Value};

pub const NOTE_HIT: &str = "NoteHit";
pub const NOTE_MISSED: &str = "NoteMissed";

pub const POINTS_PER_NOTE: i64 = 50;

pub struct Player;

impl Replicated for Player {
    const TAG: &'static str = "Player";
    const SCHEMA: &'static [Field] = &[
        Field::scalar("name"),
        Field::scalar("score"),
        Field::scalar("streak"),
        Field::reference("guitar"),
    ];

    fn setup(object: &mut Object) {
        let _ = object.set("name", "unnamed");
        let _ = object.set("score", 0);
        let _ = object.set("streak", 0);
        let _ = object.set("guitar", Value::Nil);
        object.connect(NOTE_HIT, |object, _| bump(object, "hits"));
        object.connect(NOTE_MISSED, |object, _| bump(object, "misses"));
    }
}

pub struct Guitar;

impl Replicated for Guitar {
    const TAG: &'static str = "Guitar";
    const SCHEMA: &'static [Field] = &[Field::scalar("color"), Field::scalar("frets")];

    fn setup(object: &mut Object) {
        let _ = object.set("color", "red");
        let _ = object.set("frets", 5);
    }
}

/// Registry with every game type
pub fn registry() -> Result<TypeRegistry, ReplicationError> {
    TypeRegistry::new().with::<Player>()?.with::<Guitar>()
}

/// Local (unshared) counter bumped by message handlers
fn bump(object: &mut Object, counter: &str) {
    let count = object.get(counter).and_then(Value::as_int).unwrap_or(0);
    let _ = object.set(counter, count + 1);
}

/// Scores a hit on `fret` for a player object and announces it
pub fn record_hit(player: &mut Object, fret: i64) -> Result<(), ReplicationError> {
    let streak = player.get("streak").and_then(Value::as_int).unwrap_or(0) + 1;
    let multiplier = 1 + (streak / 10).min(3);
    let score = player.get("score").and_then(Value::as_int).unwrap_or(0);

    player.set("streak", streak)?;
    player.set("score", score + POINTS_PER_NOTE * multiplier)?;
    player.emit(Message::new(NOTE_HIT).with_arg(fret))
}

/// Breaks the player's streak and announces the miss
pub fn record_miss(player: &mut Object, fret: i64) -> Result<(), ReplicationError> {
    player.set("streak", 0)?;
    player.emit(Message::new(NOTE_MISSED).with_arg(fret))
}

/// Local count of hits delivered to this replica
pub fn hits(player: &Object) -> i64 {
    player.get("hits").and_then(Value::as_int).unwrap_or(0)
}

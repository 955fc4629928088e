use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakOutcome {
    pub streak: i64,
    pub consumed_protector: bool,
}

/// Pure day-boundary streak arithmetic. Both dates are whole calendar days,
/// so repeat events inside one day cannot move the streak.
///
/// A negative day difference (backdated or clock-skewed event) is folded into
/// the same-day case: the streak never regresses.
pub fn advance_streak(
    previous: i64,
    last_activity: Option<NaiveDate>,
    protector_active: bool,
    today: NaiveDate,
) -> StreakOutcome {
    let Some(last) = last_activity else {
        // first-ever activity
        return StreakOutcome {
            streak: 1,
            consumed_protector: false,
        };
    };

    let days_since = (today - last).num_days();

    if days_since <= 0 {
        StreakOutcome {
            streak: previous,
            consumed_protector: false,
        }
    } else if days_since == 1 {
        StreakOutcome {
            streak: previous + 1,
            consumed_protector: false,
        }
    } else if protector_active {
        StreakOutcome {
            streak: previous,
            consumed_protector: true,
        }
    } else {
        StreakOutcome {
            streak: 1,
            consumed_protector: false,
        }
    }
}

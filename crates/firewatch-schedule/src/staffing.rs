//! Roster presentation helpers.

use crate::types::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffingStatus {
    Unstaffed,
    UnderStaffed,
    FullyStaffed,
}

impl StaffingStatus {
    /// Staffing of an assignment: one shift per person on it.
    pub fn of(assignment: &Assignment) -> Self {
        let staffed = assignment.shifts.len();
        if staffed == 0 {
            Self::Unstaffed
        } else if staffed < assignment.minimum_staffing as usize {
            Self::UnderStaffed
        } else {
            Self::FullyStaffed
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unstaffed => "Unstaffed",
            Self::UnderStaffed => "Under-staffed",
            Self::FullyStaffed => "Fully staffed",
        }
    }
}

impl std::fmt::Display for StaffingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const SPECIAL_ASSIGNMENTS: &[(&str, &str)] = &[
    ("Disaster Prep Public Educator", "Disaster Preparedness Public Educator"),
    ("Veg Mgmt Specialist", "Vegetation Management Specialist"),
    ("Human Rresources Coordinator", "Human Resources Coordinator"),
    ("Single Resource 2 (Line)", "Single Resource 2 (Line Assignment)"),
    ("Single Resource 3 (Line)", "Single Resource 3 (Line Assignment)"),
    ("Single Resource 4 (Line)", "Single Resource 4 (Line Assignment)"),
];

/// Expand a unit abbreviation into its full name.
///
/// `E7` is "Engine 7 (Station 7)"; `R`, `T` and `M` work the same way for
/// rescue, truck and medic units. `B3` is "Battalion Chief 3". A handful of
/// staff positions have fixed expansions. Anything else is returned as is.
pub fn expand_station_name(abbreviation: &str) -> String {
    let mut chars = abbreviation.chars();
    if let Some(prefix) = chars.next() {
        let number = chars.as_str();
        if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
            let unit = match prefix {
                'E' => Some("Engine"),
                'R' => Some("Rescue"),
                'T' => Some("Truck"),
                'M' => Some("Medic"),
                'B' => return format!("Battalion Chief {}", number),
                _ => None,
            };
            if let Some(unit) = unit {
                return format!("{} {} (Station {})", unit, number, number);
            }
        }
    }

    SPECIAL_ASSIGNMENTS
        .iter()
        .find(|(short, _)| *short == abbreviation)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| abbreviation.to_string())
}

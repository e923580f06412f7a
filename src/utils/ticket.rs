/// Display number for a ticket: two-letter department prefix plus its
/// 1-based position among that department's tickets.
///
/// The number is not stored; deleting an earlier ticket renumbers later ones.
pub fn ticket_number(target_department: &str, sequence: i64) -> String {
    let prefix: String = target_department
        .trim()
        .chars()
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();

    format!("{prefix}{sequence:04}")
}

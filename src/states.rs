//! Reference table of the 50 U.S. states.
//!
//! Weather is queried at the state capital and drought statistics by FIPS
//! code; fallback datasets emit one row per entry.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    pub name: &'static str,
    /// "City,ST" location string accepted by the weather timeline API.
    pub capital: &'static str,
    pub fips: &'static str,
}

const fn st(name: &'static str, capital: &'static str, fips: &'static str) -> StateInfo {
    StateInfo { name, capital, fips }
}

pub const STATES: [StateInfo; 50] = [
    st("Alabama", "Montgomery,AL", "01"),
    st("Alaska", "Juneau,AK", "02"),
    st("Arizona", "Phoenix,AZ", "04"),
    st("Arkansas", "Little Rock,AR", "05"),
    st("California", "Sacramento,CA", "06"),
    st("Colorado", "Denver,CO", "08"),
    st("Connecticut", "Hartford,CT", "09"),
    st("Delaware", "Dover,DE", "10"),
    st("Florida", "Tallahassee,FL", "12"),
    st("Georgia", "Atlanta,GA", "13"),
    st("Hawaii", "Honolulu,HI", "15"),
    st("Idaho", "Boise,ID", "16"),
    st("Illinois", "Springfield,IL", "17"),
    st("Indiana", "Indianapolis,IN", "18"),
    st("Iowa", "Des Moines,IA", "19"),
    st("Kansas", "Topeka,KS", "20"),
    st("Kentucky", "Frankfort,KY", "21"),
    st("Louisiana", "Baton Rouge,LA", "22"),
    st("Maine", "Augusta,ME", "23"),
    st("Maryland", "Annapolis,MD", "24"),
    st("Massachusetts", "Boston,MA", "25"),
    st("Michigan", "Lansing,MI", "26"),
    st("Minnesota", "Saint Paul,MN", "27"),
    st("Mississippi", "Jackson,MS", "28"),
    st("Missouri", "Jefferson City,MO", "29"),
    st("Montana", "Helena,MT", "30"),
    st("Nebraska", "Lincoln,NE", "31"),
    st("Nevada", "Carson City,NV", "32"),
    st("New Hampshire", "Concord,NH", "33"),
    st("New Jersey", "Trenton,NJ", "34"),
    st("New Mexico", "Santa Fe,NM", "35"),
    st("New York", "Albany,NY", "36"),
    st("North Carolina", "Raleigh,NC", "37"),
    st("North Dakota", "Bismarck,ND", "38"),
    st("Ohio", "Columbus,OH", "39"),
    st("Oklahoma", "Oklahoma City,OK", "40"),
    st("Oregon", "Salem,OR", "41"),
    st("Pennsylvania", "Harrisburg,PA", "42"),
    st("Rhode Island", "Providence,RI", "44"),
    st("South Carolina", "Columbia,SC", "45"),
    st("South Dakota", "Pierre,SD", "46"),
    st("Tennessee", "Nashville,TN", "47"),
    st("Texas", "Austin,TX", "48"),
    st("Utah", "Salt Lake City,UT", "49"),
    st("Vermont", "Montpelier,VT", "50"),
    st("Virginia", "Richmond,VA", "51"),
    st("Washington", "Olympia,WA", "53"),
    st("West Virginia", "Charleston,WV", "54"),
    st("Wisconsin", "Madison,WI", "55"),
    st("Wyoming", "Cheyenne,WY", "56"),
];

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_states_unique() {
        // ---
        let names: HashSet<_> = STATES.iter().map(|s| s.name).collect();
        let fips: HashSet<_> = STATES.iter().map(|s| s.fips).collect();
        assert_eq!(names.len(), 50);
        assert_eq!(fips.len(), 50);
    }
}

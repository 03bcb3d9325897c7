/* Answer linker-script questions for the output core
 *
 * the core treats the script as an oracle: does the script discard this
 * input section, which output section does it send it to, and how does it
 * order two output sections. section patterns are shell-style wildcards,
 * the same matching the config file's include lists use
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use serde_derive::Deserialize;
use wildmatch::WildMatch;

/* one SECTIONS-style rule: inputs matching a pattern land in an output section */
#[derive(Clone)]
#[derive(Deserialize)]
pub struct SectionRule
{
    pub output: String,
    pub include: Vec<String>
}

/* the parts of a linker script the output core consults */
#[derive(Clone)]
#[derive(Deserialize)]
pub struct Script
{
    /* input sections matching these patterns are thrown away (/DISCARD/) */
    discard: Vec<String>,

    /* rules assigning input sections to named output sections. the order
       rules are declared in is also the script's output-section order */
    rules: Vec<SectionRule>
}

impl Script
{
    /* an empty script: discards nothing, renames nothing, orders nothing */
    pub fn new() -> Script
    {
        Script { discard: Vec::new(), rules: Vec::new() }
    }

    pub fn add_discard(&mut self, pattern: &str)
    {
        self.discard.push(String::from(pattern));
    }

    pub fn add_rule(&mut self, output: &str, include: Vec<String>)
    {
        self.rules.push(SectionRule { output: String::from(output), include });
    }

    /* true if the script sends this input section name to /DISCARD/ */
    pub fn is_discarded(&self, section_name: &str) -> bool
    {
        for pattern in &self.discard
        {
            if WildMatch::new(pattern).matches(section_name)
            {
                return true;
            }
        }
        false
    }

    /* the output section the script assigns this input name to, if any */
    pub fn output_section(&self, section_name: &str) -> Option<&str>
    {
        for rule in &self.rules
        {
            for pattern in &rule.include
            {
                if WildMatch::new(pattern).matches(section_name)
                {
                    return Some(rule.output.as_str());
                }
            }
        }
        None
    }

    /* compare two output section names by their declared rule order.
       <= negative, zero, or positive as strcmp would give, zero meaning
       the script expresses no preference (undeclared names compare equal) */
    pub fn compare_sections(&self, a: &str, b: &str) -> i32
    {
        let rank_a = self.rank(a);
        let rank_b = self.rank(b);
        match (rank_a, rank_b)
        {
            (Some(x), Some(y)) => (x as i32) - (y as i32),
            _ => 0
        }
    }

    fn rank(&self, name: &str) -> Option<usize>
    {
        self.rules.iter().position(|r| r.output == name)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn discard_patterns_use_wildcards()
    {
        let mut script = Script::new();
        script.add_discard(".note*");
        assert!(script.is_discarded(".note.GNU-stack"));
        assert!(script.is_discarded(".note") == true);
        assert!(script.is_discarded(".text") == false);
    }

    #[test]
    fn rules_assign_output_names()
    {
        let mut script = Script::new();
        script.add_rule(".text", vec![String::from(".text*"), String::from(".entry*")]);
        assert_eq!(script.output_section(".text.hot"), Some(".text"));
        assert_eq!(script.output_section(".entry"), Some(".text"));
        assert_eq!(script.output_section(".data"), None);
    }

    #[test]
    fn declared_order_wins_and_silence_is_equal()
    {
        let mut script = Script::new();
        script.add_rule(".data", vec![String::from(".data*")]);
        script.add_rule(".text", vec![String::from(".text*")]);
        assert!(script.compare_sections(".data", ".text") < 0);
        assert!(script.compare_sections(".text", ".data") > 0);
        assert_eq!(script.compare_sections(".rodata", ".bss"), 0);
        assert_eq!(script.compare_sections(".text", ".unheard-of"), 0);
    }
}

/* Collect link errors without aborting the whole process
 *
 * errors accumulate so the user sees every undefined symbol in one run.
 * each phase of the link checks has_error() at its boundary and backs out
 * instead of writing a broken executable.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

/* the kinds of error the output core can hit */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError
{
    UndefinedSymbol(String),    /* symbol name plus referencing file if known */
    IoOpen(String),             /* couldn't create or map the output file */
    IoCommit(String),           /* couldn't flush the output mapping */
    Internal(String)            /* anything else that forces an abort */
}

impl std::fmt::Display for LinkError
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self
        {
            LinkError::UndefinedSymbol(msg) => write!(f, "undefined symbol: {}", msg),
            LinkError::IoOpen(msg) => write!(f, "failed to open {}", msg),
            LinkError::IoCommit(msg) => write!(f, "failed to write {}", msg),
            LinkError::Internal(msg) => write!(f, "{}", msg)
        }
    }
}

/* gather up errors and warnings over the lifetime of a link */
pub struct Reporter
{
    errors: Vec<LinkError>,
    warnings: Vec<String>
}

impl Reporter
{
    pub fn new() -> Reporter
    {
        Reporter { errors: Vec::new(), warnings: Vec::new() }
    }

    /* record an error. the link carries on gathering diagnostics but
       will refuse to commit the output file */
    pub fn error(&mut self, e: LinkError)
    {
        eprintln!("{}", &e);
        self.errors.push(e);
    }

    /* record a warning. warnings never block the output */
    pub fn warning(&mut self, msg: String)
    {
        eprintln!("warning: {}", &msg);
        self.warnings.push(msg);
    }

    pub fn has_error(&self) -> bool { self.errors.is_empty() == false }
    pub fn errors(&self) -> &Vec<LinkError> { &self.errors }
    pub fn warnings(&self) -> &Vec<String> { &self.warnings }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn errors_accumulate()
    {
        let mut r = Reporter::new();
        assert_eq!(r.has_error(), false);

        r.error(LinkError::UndefinedSymbol(String::from("foo")));
        r.error(LinkError::UndefinedSymbol(String::from("bar")));
        assert_eq!(r.has_error(), true);
        assert_eq!(r.errors().len(), 2);
    }

    #[test]
    fn warnings_do_not_set_the_error_flag()
    {
        let mut r = Reporter::new();
        r.warning(String::from("undefined symbol: foo"));
        assert_eq!(r.has_error(), false);
        assert_eq!(r.warnings().len(), 1);
    }
}
